//! Stream values
//!
//! A stream couples a metadata dictionary with a binary payload that is
//! fetched lazily: the dictionary is parsed eagerly, but raw bytes are only
//! read (and optionally run through the filter chain) when a caller asks
//! for them. The payload's source is either an in-memory buffer, a byte
//! range of the original file, or a caller-supplied provider.

use crate::error::{Error, Result};
use crate::object::{Dict, Object, Value};
use crate::objgen::ObjGen;
use crate::pipeline::{
    FlateAction, Pipeline, PipelineBox, PlAscii85Decoder, PlAsciiHexDecoder, PlBuffer, PlFlate,
    PlPredictor, PlRunLengthDecoder, PredictorParams,
};
use bytes::Bytes;
use std::fmt;
use std::rc::{Rc, Weak};

/// Caller-supplied source of raw stream bytes
pub trait StreamProvider {
    /// Write the stream's raw (encoded) bytes into the pipeline
    fn provide_stream_data(&self, og: ObjGen, pipeline: &mut dyn Pipeline) -> Result<()>;
}

/// Where a stream's raw bytes come from
#[derive(Clone)]
pub enum StreamSource {
    /// In-memory payload
    Buffer(Bytes),
    /// Byte range of the owning document's input
    File {
        doc: Weak<crate::document::DocumentState>,
        offset: u64,
        length: u64,
    },
    /// Caller-supplied provider
    Provider(Rc<dyn StreamProvider>),
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Buffer(b) => write!(f, "Buffer({} bytes)", b.len()),
            StreamSource::File { offset, length, .. } => {
                write!(f, "File {{ offset: {}, length: {} }}", offset, length)
            }
            StreamSource::Provider(_) => write!(f, "Provider"),
        }
    }
}

/// A stream: metadata dictionary plus lazily fetched payload
#[derive(Debug, Clone)]
pub struct StreamValue {
    pub(crate) dict: Dict,
    pub(crate) source: StreamSource,
}

impl StreamValue {
    pub(crate) fn new(dict: Dict, source: StreamSource) -> Self {
        Self { dict, source }
    }
}

/// One entry of a stream's filter chain
#[derive(Debug, Clone)]
struct FilterSpec {
    name: String,
    predictor: Option<PredictorParams>,
}

impl Object {
    /// Build a buffer-backed stream object; /Length is set to match
    pub fn stream(dict: Dict, data: impl Into<Bytes>) -> Object {
        let data = data.into();
        let obj = Object::from_value(Value::Stream(StreamValue::new(
            dict,
            StreamSource::Buffer(data.clone()),
        )));
        // construction cannot fail on a fresh stream
        let _ = obj.replace_key("Length", Object::integer(data.len() as i64));
        obj
    }

    fn with_stream<T>(&self, f: impl FnOnce(&StreamValue) -> Result<T>) -> Result<T> {
        self.with_value(|v| match v {
            Value::Stream(s) => f(s),
            other => Err(Error::TypeMismatch {
                expected: "stream",
                actual: other.type_name(),
            }),
        })
    }

    /// Replace the stream's payload with an in-memory buffer, rewriting
    /// /Length and clearing any filter keys (the new data is unencoded)
    pub fn replace_stream_data(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let len = data.len() as i64;
        self.with_value_mut_stream(|s| {
            s.source = StreamSource::Buffer(data);
            Ok(())
        })?;
        self.replace_key("Length", Object::integer(len))?;
        self.remove_key("Filter")?;
        self.remove_key("DecodeParms")?;
        Ok(())
    }

    fn with_value_mut_stream<T>(&self, f: impl FnOnce(&mut StreamValue) -> Result<T>) -> Result<T> {
        self.resolve()?;
        let mut guard = self.borrow_slot_mut();
        match &mut guard.value {
            Value::Stream(s) => f(s),
            Value::Destroyed => Err(Error::Destroyed),
            other => Err(Error::TypeMismatch {
                expected: "stream",
                actual: other.type_name(),
            }),
        }
    }

    /// The stream's raw (still encoded) payload
    pub fn raw_stream_data(&self) -> Result<Vec<u8>> {
        let (source, og) = self.with_stream(|s| Ok((s.source.clone(), self.og())))?;
        fetch_raw(&source, og)
    }

    /// The stream's payload with as many filters decoded as possible.
    ///
    /// When the chain contains a filter this crate cannot decode, the raw
    /// bytes are returned unchanged; preserving the original data verbatim
    /// beats failing the whole file.
    pub fn stream_data(&self) -> Result<Vec<u8>> {
        let buf = PlBuffer::new("stream data");
        let handle = buf.handle();
        let mut sink: PipelineBox = Box::new(buf);
        self.pipe_stream_data(&mut sink, true)?;
        Ok(handle.take())
    }

    /// Write the stream's bytes into `pipeline`, optionally decoding the
    /// filter chain. Returns true when the data was decoded, false when
    /// unsupported filters forced a raw passthrough.
    pub fn pipe_stream_data(&self, pipeline: &mut PipelineBox, decode: bool) -> Result<bool> {
        let raw = self.raw_stream_data()?;

        if !decode {
            pipeline.write(&raw)?;
            pipeline.finish()?;
            return Ok(false);
        }

        let specs = self.filter_specs()?;
        let decodable = specs.iter().all(|s| is_supported_filter(&s.name));
        if !decodable {
            tracing::debug!(
                og = %self.og(),
                "stream has unsupported filters, passing raw data through"
            );
            pipeline.write(&raw)?;
            pipeline.finish()?;
            return Ok(false);
        }

        if specs.is_empty() {
            pipeline.write(&raw)?;
            pipeline.finish()?;
            return Ok(true);
        }

        // Build the chain innermost-first: the first /Filter entry sees the
        // raw bytes, its output feeds the second, and so on outward.
        let terminal = PlBuffer::new("decoded");
        let decoded = terminal.handle();
        let mut next: PipelineBox = Box::new(terminal);
        for spec in specs.iter().rev() {
            next = build_decode_stage(spec, next)?;
        }
        next.write(&raw)?;
        next.finish()?;

        pipeline.write(&decoded.take())?;
        pipeline.finish()?;
        Ok(true)
    }

    /// True when every filter in the chain can be decoded by this crate
    pub fn is_stream_filterable(&self) -> Result<bool> {
        let specs = self.filter_specs()?;
        Ok(specs.iter().all(|s| is_supported_filter(&s.name)))
    }

    /// Parse /Filter and /DecodeParms into an ordered filter list
    fn filter_specs(&self) -> Result<Vec<FilterSpec>> {
        let filter = self.dict_get("Filter")?;
        filter.resolve()?;

        let names: Vec<Object> = if filter.is_null()? {
            Vec::new()
        } else if filter.is_name()? {
            vec![filter.clone()]
        } else if filter.is_array()? {
            filter.as_array()?
        } else {
            return Err(Error::parse("stream /Filter is neither name nor array"));
        };

        let parms = self.dict_get("DecodeParms")?;
        let parm_at = |i: usize| -> Result<Option<Object>> {
            parms.resolve()?;
            if parms.is_null()? {
                Ok(None)
            } else if parms.is_array()? {
                match parms.array_get(i) {
                    Ok(p) => {
                        p.resolve()?;
                        Ok(if p.is_null()? { None } else { Some(p) })
                    }
                    Err(_) => Ok(None),
                }
            } else if i == 0 {
                Ok(Some(parms.clone()))
            } else {
                Ok(None)
            }
        };

        let mut specs = Vec::with_capacity(names.len());
        for (i, name_obj) in names.iter().enumerate() {
            let name = name_obj.as_name()?.as_str().to_string();
            let predictor = match parm_at(i)? {
                Some(p) if p.is_dictionary()? => {
                    let predictor = p.dict_get("Predictor")?;
                    if !predictor.is_null()? && predictor.as_int()? > 1 {
                        Some(PredictorParams {
                            predictor: predictor.as_i32()?,
                            colors: int_or(&p, "Colors", 1)?,
                            bits_per_component: int_or(&p, "BitsPerComponent", 8)?,
                            columns: int_or(&p, "Columns", 1)?,
                        })
                    } else {
                        None
                    }
                }
                _ => None,
            };
            specs.push(FilterSpec { name, predictor });
        }
        Ok(specs)
    }
}

fn int_or(dict: &Object, key: &str, default: usize) -> Result<usize> {
    let v = dict.dict_get(key)?;
    if v.is_null()? {
        Ok(default)
    } else {
        usize::try_from(v.as_int()?)
            .map_err(|_| Error::range(format!("negative value for /{}", key)))
    }
}

fn is_supported_filter(name: &str) -> bool {
    matches!(
        name,
        "FlateDecode" | "Fl" | "ASCIIHexDecode" | "AHx" | "ASCII85Decode" | "A85"
            | "RunLengthDecode" | "RL"
    )
}

fn build_decode_stage(spec: &FilterSpec, next: PipelineBox) -> Result<PipelineBox> {
    let stage: PipelineBox = match spec.name.as_str() {
        "FlateDecode" | "Fl" => {
            // a predictor undoes its transform after inflation
            let next = match spec.predictor {
                Some(params) => {
                    Box::new(PlPredictor::new("predictor", next, params)) as PipelineBox
                }
                None => next,
            };
            Box::new(PlFlate::new("inflate", next, FlateAction::Inflate))
        }
        "ASCIIHexDecode" | "AHx" => Box::new(PlAsciiHexDecoder::new("ahx", next)),
        "ASCII85Decode" | "A85" => Box::new(PlAscii85Decoder::new("a85", next)),
        "RunLengthDecode" | "RL" => Box::new(PlRunLengthDecoder::new("rl", next)),
        other => {
            return Err(Error::unsupported(format!("filter /{}", other)));
        }
    };
    Ok(stage)
}

fn fetch_raw(source: &StreamSource, og: ObjGen) -> Result<Vec<u8>> {
    match source {
        StreamSource::Buffer(b) => Ok(b.to_vec()),
        StreamSource::File { doc, offset, length } => {
            let doc = doc.upgrade().ok_or(Error::Destroyed)?;
            let raw = doc.read_span(*offset, *length)?;
            match doc.decrypter() {
                Some(d) => d.decrypt_stream(&raw, og),
                None => Ok(raw),
            }
        }
        StreamSource::Provider(p) => {
            let buf = PlBuffer::new("provided");
            let handle = buf.handle();
            let mut sink: PipelineBox = Box::new(buf);
            p.provide_stream_data(og, sink.as_mut())?;
            sink.finish()?;
            Ok(handle.take())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PlDiscard;

    fn flate_encode(data: &[u8]) -> Vec<u8> {
        let buf = PlBuffer::new("out");
        let handle = buf.handle();
        let mut p: PipelineBox =
            Box::new(PlFlate::new("deflate", Box::new(buf), FlateAction::Deflate));
        p.write(data).unwrap();
        p.finish().unwrap();
        handle.take()
    }

    fn stream_with_filter(data: Vec<u8>, filter: Option<&str>) -> Object {
        let obj = Object::stream(Dict::new(), data);
        if let Some(f) = filter {
            obj.replace_key("Filter", Object::name(f)).unwrap();
        }
        obj
    }

    #[test]
    fn test_stream_constructor_sets_length() {
        let obj = Object::stream(Dict::new(), &b"payload"[..]);
        assert!(obj.is_stream().unwrap());
        assert_eq!(obj.dict_get("Length").unwrap().as_int().unwrap(), 7);
    }

    #[test]
    fn test_unfiltered_data_round_trips() {
        let obj = stream_with_filter(b"plain text".to_vec(), None);
        assert_eq!(obj.stream_data().unwrap(), b"plain text");
        assert_eq!(obj.raw_stream_data().unwrap(), b"plain text");
    }

    #[test]
    fn test_flate_decode() {
        let encoded = flate_encode(b"compress me please, repeatedly, repeatedly");
        let obj = stream_with_filter(encoded.clone(), Some("FlateDecode"));
        assert_eq!(
            obj.stream_data().unwrap(),
            b"compress me please, repeatedly, repeatedly"
        );
        // raw data is still the encoded form
        assert_eq!(obj.raw_stream_data().unwrap(), encoded);
    }

    #[test]
    fn test_filter_chain_order() {
        // encode with flate, then hex: decoding must run hex first
        let flated = flate_encode(b"chained");
        let mut hexed: Vec<u8> = flated
            .iter()
            .flat_map(|b| format!("{:02X}", b).into_bytes())
            .collect();
        hexed.push(b'>');

        let obj = Object::stream(Dict::new(), hexed);
        obj.replace_key(
            "Filter",
            Object::array(vec![
                Object::name("ASCIIHexDecode"),
                Object::name("FlateDecode"),
            ]),
        )
        .unwrap();
        assert_eq!(obj.stream_data().unwrap(), b"chained");
    }

    #[test]
    fn test_unknown_filter_falls_back_to_raw() {
        let obj = stream_with_filter(b"\xff\xd8jpeg-ish".to_vec(), Some("DCTDecode"));
        assert!(!obj.is_stream_filterable().unwrap());
        // unsupported filter: data comes back verbatim instead of erroring
        assert_eq!(obj.stream_data().unwrap(), b"\xff\xd8jpeg-ish");

        let mut sink: PipelineBox = Box::new(PlDiscard::new("sink"));
        assert!(!obj.pipe_stream_data(&mut sink, true).unwrap());
    }

    #[test]
    fn test_pipe_without_decoding() {
        let encoded = flate_encode(b"data");
        let obj = stream_with_filter(encoded.clone(), Some("FlateDecode"));
        let buf = PlBuffer::new("out");
        let handle = buf.handle();
        let mut sink: PipelineBox = Box::new(buf);
        assert!(!obj.pipe_stream_data(&mut sink, false).unwrap());
        assert_eq!(handle.take(), encoded);
    }

    #[test]
    fn test_replace_stream_data() {
        let encoded = flate_encode(b"old");
        let obj = stream_with_filter(encoded, Some("FlateDecode"));
        obj.replace_stream_data(&b"new data"[..]).unwrap();
        assert_eq!(obj.stream_data().unwrap(), b"new data");
        assert_eq!(obj.dict_get("Length").unwrap().as_int().unwrap(), 8);
        assert!(!obj.dict_has("Filter").unwrap());
    }

    #[test]
    fn test_provider_source() {
        struct Fixed;
        impl StreamProvider for Fixed {
            fn provide_stream_data(&self, _og: ObjGen, p: &mut dyn Pipeline) -> Result<()> {
                p.write(b"from provider")
            }
        }
        let value = Value::Stream(StreamValue::new(
            Dict::new(),
            StreamSource::Provider(Rc::new(Fixed)),
        ));
        let obj = Object::from_value(value);
        assert_eq!(obj.stream_data().unwrap(), b"from provider");
    }

    #[test]
    fn test_decode_parms_predictor() {
        // row filter 2 (Up) over 4-byte rows, then flate
        let rows = [2u8, 1, 2, 3, 4, 2, 1, 1, 1, 1];
        let encoded = flate_encode(&rows);
        let obj = stream_with_filter(encoded, Some("FlateDecode"));
        let parms = Object::dictionary(Dict::new());
        parms
            .replace_key("Predictor", Object::integer(12))
            .unwrap();
        parms.replace_key("Columns", Object::integer(4)).unwrap();
        obj.replace_key("DecodeParms", parms).unwrap();

        assert_eq!(obj.stream_data().unwrap(), vec![1, 2, 3, 4, 2, 3, 4, 5]);
    }

    #[test]
    fn test_stream_dict_mutation_touches_metadata_only() {
        let obj = stream_with_filter(b"payload".to_vec(), None);
        obj.replace_key("Type", Object::name("XObject")).unwrap();
        assert_eq!(obj.stream_data().unwrap(), b"payload");
        assert!(obj.dict_has("Type").unwrap());
    }
}
