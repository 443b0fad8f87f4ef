//! Pipeline system for stream processing
//!
//! Composable byte-stream stages with a uniform `write`/`finish` contract.
//! Stages chain by construction: each stage transforms the bytes written to
//! it and pushes the result to the next stage. Both stream decoding and the
//! writer's encode path are built from these stages.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

/// A boxed pipeline stage for ownership and chaining
pub type PipelineBox = Box<dyn Pipeline>;

/// Pipeline trait for stream processing
///
/// Implementations process data in `write` and flush any remaining state in
/// `finish`, forwarding to the next stage in the chain when one exists.
pub trait Pipeline {
    /// Identifier for this stage, used in error messages
    fn identifier(&self) -> &str;

    /// Write data into the stage
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Finish processing and flush remaining data down the chain
    fn finish(&mut self) -> Result<()>;
}

// ============================================================================
// Terminal stages
// ============================================================================

/// Shared handle to a buffer stage's collected bytes
#[derive(Clone)]
pub struct BufferHandle {
    data: Rc<RefCell<Vec<u8>>>,
}

impl BufferHandle {
    /// Take the collected bytes, leaving the buffer empty
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.data.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }
}

/// Buffer stage that collects all written data
pub struct PlBuffer {
    identifier: String,
    data: Rc<RefCell<Vec<u8>>>,
}

impl PlBuffer {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            data: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Handle for retrieving the collected bytes after the chain finishes
    pub fn handle(&self) -> BufferHandle {
        BufferHandle {
            data: Rc::clone(&self.data),
        }
    }
}

impl Pipeline for PlBuffer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.data.borrow_mut().extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discard stage that throws away all data
pub struct PlDiscard {
    identifier: String,
}

impl PlDiscard {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
        }
    }
}

impl Pipeline for PlDiscard {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Count
// ============================================================================

/// Shared view of a count stage's byte total
#[derive(Clone, Default)]
pub struct CountHandle {
    count: Rc<RefCell<u64>>,
}

impl CountHandle {
    pub fn get(&self) -> u64 {
        *self.count.borrow()
    }
}

/// Count stage that counts bytes passing through
pub struct PlCount {
    identifier: String,
    next: PipelineBox,
    count: Rc<RefCell<u64>>,
}

impl PlCount {
    pub fn new(identifier: &str, next: PipelineBox) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            count: Rc::new(RefCell::new(0)),
        }
    }

    pub fn handle(&self) -> CountHandle {
        CountHandle {
            count: Rc::clone(&self.count),
        }
    }
}

impl Pipeline for PlCount {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        *self.count.borrow_mut() += data.len() as u64;
        self.next.write(data)
    }

    fn finish(&mut self) -> Result<()> {
        self.next.finish()
    }
}

// ============================================================================
// Flate
// ============================================================================

/// Flate compression action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlateAction {
    /// Compress data (zlib format, as PDF FlateDecode expects)
    Deflate,
    /// Decompress data
    Inflate,
}

/// Flate stage for zlib compression and decompression
///
/// Input is buffered and processed when the chain finishes, since zlib
/// streams cannot be flushed incrementally without hurting ratio.
pub struct PlFlate {
    identifier: String,
    next: PipelineBox,
    action: FlateAction,
    compression_level: u32,
    buffer: Vec<u8>,
    memory_limit: Option<usize>,
}

impl PlFlate {
    /// Output chunk size used when draining the codec
    const OUT_BUFSIZE: usize = 65536;

    pub fn new(identifier: &str, next: PipelineBox, action: FlateAction) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            action,
            compression_level: 6,
            buffer: Vec::new(),
            memory_limit: None,
        }
    }

    /// Set the compression level (0-9)
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression_level = level.min(9);
    }

    /// Cap how many bytes decompression may produce
    pub fn set_memory_limit(&mut self, limit: usize) {
        self.memory_limit = Some(limit);
    }

    fn process_deflate(&mut self) -> Result<()> {
        let mut encoder =
            ZlibEncoder::new(&self.buffer[..], Compression::new(self.compression_level));
        let mut output = vec![0u8; Self::OUT_BUFSIZE];
        loop {
            let n = encoder
                .read(&mut output)
                .map_err(|e| Error::parse(format!("flate compression error: {}", e)))?;
            if n == 0 {
                break;
            }
            self.next.write(&output[..n])?;
        }
        Ok(())
    }

    fn process_inflate(&mut self) -> Result<()> {
        let mut decoder = ZlibDecoder::new(&self.buffer[..]);
        let mut output = vec![0u8; Self::OUT_BUFSIZE];
        let mut written = 0usize;
        loop {
            let n = decoder
                .read(&mut output)
                .map_err(|e| Error::parse(format!("flate decompression error: {}", e)))?;
            if n == 0 {
                break;
            }
            written += n;
            if let Some(limit) = self.memory_limit {
                if written > limit {
                    return Err(Error::limit(format!(
                        "flate decompression exceeded memory limit of {} bytes",
                        limit
                    )));
                }
            }
            self.next.write(&output[..n])?;
        }
        Ok(())
    }
}

impl Pipeline for PlFlate {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            match self.action {
                FlateAction::Deflate => self.process_deflate()?,
                FlateAction::Inflate => self.process_inflate()?,
            }
            self.buffer.clear();
        }
        self.next.finish()
    }
}

// ============================================================================
// Predictor
// ============================================================================

/// Predictor parameters from a stream's /DecodeParms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    /// 1 = none, 2 = TIFF, 10-15 = PNG
    pub predictor: i32,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    /// Bytes per complete pixel, minimum one
    fn bytes_per_pixel(&self) -> usize {
        ((self.colors * self.bits_per_component) / 8).max(1)
    }

    /// Bytes per encoded row, excluding the PNG filter-type byte
    fn bytes_per_row(&self) -> usize {
        (self.colors * self.bits_per_component * self.columns).div_ceil(8)
    }
}

/// Predictor-undo stage applied after decompression
///
/// Cross-reference streams almost always use PNG Up prediction
/// (/Predictor 12), so this stage is load-bearing for xref stream support.
pub struct PlPredictor {
    identifier: String,
    next: PipelineBox,
    params: PredictorParams,
    buffer: Vec<u8>,
}

impl PlPredictor {
    pub fn new(identifier: &str, next: PipelineBox, params: PredictorParams) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            params,
            buffer: Vec::new(),
        }
    }
}

impl Pipeline for PlPredictor {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let decoded = match self.params.predictor {
            0 | 1 => std::mem::take(&mut self.buffer),
            2 => undo_tiff_predictor(&self.buffer, &self.params)?,
            10..=15 => undo_png_predictor(&self.buffer, &self.params)?,
            other => {
                return Err(Error::parse(format!("unknown predictor {}", other)));
            }
        };
        self.buffer.clear();
        self.next.write(&decoded)?;
        self.next.finish()
    }
}

/// Undo PNG row filters (predictors 10-15); each row is prefixed by its
/// filter-type byte
fn undo_png_predictor(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    let row_len = params.bytes_per_row();
    let bpp = params.bytes_per_pixel();
    let stride = row_len + 1;
    if row_len == 0 || data.len() % stride != 0 {
        return Err(Error::parse(format!(
            "predictor data length {} not a multiple of row length {}",
            data.len(),
            stride
        )));
    }

    let mut out = Vec::with_capacity((data.len() / stride) * row_len);
    let mut prev_row = vec![0u8; row_len];

    for chunk in data.chunks(stride) {
        let filter = chunk[0];
        let mut row = chunk[1..].to_vec();
        match filter {
            0 => {}
            1 => {
                // Sub
                for i in bpp..row_len {
                    row[i] = row[i].wrapping_add(row[i - bpp]);
                }
            }
            2 => {
                // Up
                for i in 0..row_len {
                    row[i] = row[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                // Average
                for i in 0..row_len {
                    let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                    let up = prev_row[i] as u16;
                    row[i] = row[i].wrapping_add(((left + up) / 2) as u8);
                }
            }
            4 => {
                // Paeth
                for i in 0..row_len {
                    let a = if i >= bpp { row[i - bpp] as i16 } else { 0 };
                    let b = prev_row[i] as i16;
                    let c = if i >= bpp { prev_row[i - bpp] as i16 } else { 0 };
                    let p = a + b - c;
                    let (pa, pb, pc) = ((p - a).abs(), (p - b).abs(), (p - c).abs());
                    let pred = if pa <= pb && pa <= pc {
                        a
                    } else if pb <= pc {
                        b
                    } else {
                        c
                    };
                    row[i] = row[i].wrapping_add(pred as u8);
                }
            }
            other => {
                return Err(Error::parse(format!("invalid PNG filter type {}", other)));
            }
        }
        out.extend_from_slice(&row);
        prev_row = row;
    }
    Ok(out)
}

/// Undo TIFF horizontal differencing (predictor 2)
fn undo_tiff_predictor(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    if params.bits_per_component != 8 {
        return Err(Error::unsupported(
            "TIFF predictor with sub-byte components",
        ));
    }
    let row_len = params.bytes_per_row();
    if row_len == 0 {
        return Err(Error::parse("predictor parameters describe empty rows"));
    }
    let bpp = params.bytes_per_pixel();
    let mut out = data.to_vec();
    for row in out.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    Ok(out)
}

// ============================================================================
// ASCII codecs
// ============================================================================

/// ASCIIHexDecode stage
pub struct PlAsciiHexDecoder {
    identifier: String,
    next: PipelineBox,
    pending: Option<u8>,
    done: bool,
}

impl PlAsciiHexDecoder {
    pub fn new(identifier: &str, next: PipelineBox) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            pending: None,
            done: false,
        }
    }
}

impl Pipeline for PlAsciiHexDecoder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        for &b in data {
            if self.done {
                break;
            }
            if crate::tokenizer::is_whitespace(b) {
                continue;
            }
            if b == b'>' {
                self.done = true;
                continue;
            }
            if !b.is_ascii_hexdigit() {
                return Err(Error::parse(format!(
                    "invalid character {:#04x} in ASCIIHex data",
                    b
                )));
            }
            let digit = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                _ => b - b'A' + 10,
            };
            match self.pending.take() {
                Some(hi) => self.next.write(&[(hi << 4) | digit])?,
                None => self.pending = Some(digit),
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // odd final digit implies a trailing zero
        if let Some(hi) = self.pending.take() {
            self.next.write(&[hi << 4])?;
        }
        self.next.finish()
    }
}

/// ASCII85Decode stage
pub struct PlAscii85Decoder {
    identifier: String,
    next: PipelineBox,
    group: [u8; 5],
    group_len: usize,
    done: bool,
}

impl PlAscii85Decoder {
    pub fn new(identifier: &str, next: PipelineBox) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            group: [0; 5],
            group_len: 0,
            done: false,
        }
    }

    fn flush_group(&mut self, count: usize) -> Result<()> {
        // pad with 'u' (84) and drop the same number of output bytes
        for i in count..5 {
            self.group[i] = 84;
        }
        let mut value: u32 = 0;
        for &d in &self.group {
            value = value
                .checked_mul(85)
                .and_then(|v| v.checked_add(d as u32))
                .ok_or_else(|| Error::parse("ASCII85 group overflow"))?;
        }
        let bytes = value.to_be_bytes();
        self.next.write(&bytes[..count - 1])?;
        self.group_len = 0;
        Ok(())
    }
}

impl Pipeline for PlAscii85Decoder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            i += 1;
            if self.done || crate::tokenizer::is_whitespace(b) {
                continue;
            }
            match b {
                b'~' => {
                    self.done = true;
                }
                b'z' if self.group_len == 0 => {
                    self.next.write(&[0, 0, 0, 0])?;
                }
                b'!'..=b'u' => {
                    self.group[self.group_len] = b - b'!';
                    self.group_len += 1;
                    if self.group_len == 5 {
                        self.flush_group(5)?;
                    }
                }
                _ => {
                    return Err(Error::parse(format!(
                        "invalid character {:#04x} in ASCII85 data",
                        b
                    )));
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let len = self.group_len;
        if len == 1 {
            return Err(Error::parse("ASCII85 final group too short"));
        }
        if len >= 2 {
            self.flush_group(len)?;
        }
        self.next.finish()
    }
}

/// RunLengthDecode stage
pub struct PlRunLengthDecoder {
    identifier: String,
    next: PipelineBox,
    buffer: Vec<u8>,
}

impl PlRunLengthDecoder {
    pub fn new(identifier: &str, next: PipelineBox) -> Self {
        Self {
            identifier: identifier.to_string(),
            next,
            buffer: Vec::new(),
        }
    }
}

impl Pipeline for PlRunLengthDecoder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let data = std::mem::take(&mut self.buffer);
        let mut i = 0;
        while i < data.len() {
            let len_byte = data[i];
            i += 1;
            match len_byte {
                128 => break, // EOD
                0..=127 => {
                    let count = len_byte as usize + 1;
                    if i + count > data.len() {
                        return Err(Error::parse("run length literal extends past data"));
                    }
                    self.next.write(&data[i..i + count])?;
                    i += count;
                }
                129..=255 => {
                    if i >= data.len() {
                        return Err(Error::parse("run length repeat with no byte"));
                    }
                    let count = 257 - len_byte as usize;
                    let byte = data[i];
                    i += 1;
                    self.next.write(&vec![byte; count])?;
                }
            }
        }
        self.next.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_chain(mut head: PipelineBox, input: &[u8], out: &BufferHandle) -> Result<Vec<u8>> {
        head.write(input)?;
        head.finish()?;
        Ok(out.take())
    }

    #[test]
    fn test_buffer_collects() {
        let buf = PlBuffer::new("out");
        let handle = buf.handle();
        let mut head: PipelineBox = Box::new(buf);
        head.write(b"Hello ").unwrap();
        head.write(b"World").unwrap();
        head.finish().unwrap();
        assert_eq!(handle.take(), b"Hello World");
    }

    #[test]
    fn test_count_counts() {
        let buf = PlBuffer::new("out");
        let out = buf.handle();
        let count = PlCount::new("count", Box::new(buf));
        let counter = count.handle();
        let mut head: PipelineBox = Box::new(count);
        head.write(b"12345").unwrap();
        head.write(b"678").unwrap();
        head.finish().unwrap();
        assert_eq!(counter.get(), 8);
        assert_eq!(out.take().len(), 8);
    }

    #[test]
    fn test_discard() {
        let mut d = PlDiscard::new("sink");
        d.write(b"anything").unwrap();
        d.finish().unwrap();
    }

    #[test]
    fn test_flate_round_trip() {
        let buf = PlBuffer::new("out");
        let out = buf.handle();
        let inflate = PlFlate::new("inflate", Box::new(buf), FlateAction::Inflate);
        let deflate = PlFlate::new("deflate", Box::new(inflate), FlateAction::Deflate);
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let result = run_chain(Box::new(deflate), &data, &out).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_flate_memory_limit() {
        // compress something large, then decompress under a tiny limit
        let buf = PlBuffer::new("compressed");
        let compressed = buf.handle();
        let deflate = PlFlate::new("deflate", Box::new(buf), FlateAction::Deflate);
        let out = compressed.clone();
        run_chain(Box::new(deflate), &vec![0u8; 1 << 16], &out).unwrap();

        let sink = PlBuffer::new("out");
        let handle = sink.handle();
        let mut inflate = PlFlate::new("inflate", Box::new(sink), FlateAction::Inflate);
        inflate.set_memory_limit(1024);
        let err = run_chain(Box::new(inflate), &out.take(), &handle).unwrap_err();
        assert!(matches!(err, Error::Limit(_)));
    }

    #[test]
    fn test_ascii_hex_decode() {
        let buf = PlBuffer::new("out");
        let out = buf.handle();
        let hex = PlAsciiHexDecoder::new("hex", Box::new(buf));
        let result = run_chain(Box::new(hex), b"48 65 6C 6C 6F>", &out).unwrap();
        assert_eq!(result, b"Hello");
    }

    #[test]
    fn test_ascii_hex_odd_digit() {
        let buf = PlBuffer::new("out");
        let out = buf.handle();
        let hex = PlAsciiHexDecoder::new("hex", Box::new(buf));
        let result = run_chain(Box::new(hex), b"414", &out).unwrap();
        assert_eq!(result, vec![0x41, 0x40]);
    }

    #[test]
    fn test_ascii85_decode() {
        let buf = PlBuffer::new("out");
        let out = buf.handle();
        let a85 = PlAscii85Decoder::new("a85", Box::new(buf));
        // "Man " encodes to 9jqo^
        let result = run_chain(Box::new(a85), b"9jqo^~>", &out).unwrap();
        assert_eq!(result, b"Man ");
    }

    #[test]
    fn test_ascii85_z_shortcut() {
        let buf = PlBuffer::new("out");
        let out = buf.handle();
        let a85 = PlAscii85Decoder::new("a85", Box::new(buf));
        let result = run_chain(Box::new(a85), b"z~>", &out).unwrap();
        assert_eq!(result, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_run_length_decode() {
        let buf = PlBuffer::new("out");
        let out = buf.handle();
        let rl = PlRunLengthDecoder::new("rl", Box::new(buf));
        // literal "AB", then 'C' repeated 4 times, then EOD
        let encoded = [1u8, b'A', b'B', 253, b'C', 128];
        let result = run_chain(Box::new(rl), &encoded, &out).unwrap();
        assert_eq!(result, b"ABCCCC");
    }

    #[test]
    fn test_png_up_predictor() {
        // two rows of 4 bytes with the Up filter, as xref streams use
        let params = PredictorParams {
            predictor: 12,
            colors: 1,
            bits_per_component: 8,
            columns: 4,
        };
        let raw = [
            2, 1, 2, 3, 4, // row 1: up against zero row
            2, 1, 1, 1, 1, // row 2: deltas against row 1
        ];
        let decoded = undo_png_predictor(&raw, &params).unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 4, 2, 3, 4, 5]);
    }

    #[test]
    fn test_png_sub_predictor() {
        let params = PredictorParams {
            predictor: 11,
            colors: 1,
            bits_per_component: 8,
            columns: 4,
        };
        let raw = [1, 10, 1, 1, 1];
        let decoded = undo_png_predictor(&raw, &params).unwrap();
        assert_eq!(decoded, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_predictor_bad_length() {
        let params = PredictorParams {
            predictor: 12,
            columns: 4,
            ..Default::default()
        };
        assert!(undo_png_predictor(&[2, 1, 2], &params).is_err());
    }

    #[test]
    fn test_tiff_predictor() {
        let params = PredictorParams {
            predictor: 2,
            colors: 1,
            bits_per_component: 8,
            columns: 4,
        };
        let decoded = undo_tiff_predictor(&[5, 1, 1, 1], &params).unwrap();
        assert_eq!(decoded, vec![5, 6, 7, 8]);
    }
}
