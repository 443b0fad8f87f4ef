//! Input sources for reading PDF data
//!
//! A random-access byte stream abstraction over files, in-memory buffers,
//! and byte-range views of other sources. Documents slurp their source once
//! at open time; file sources are memory-mapped so the slurp is a single
//! copy out of the page cache.

use crate::error::{Error, Result};
use bytes::Bytes;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;

/// Random-access input source trait
pub trait InputSource: Send {
    /// Name or description of this source, used in warnings and errors
    fn name(&self) -> &str;

    /// Read into the buffer, returning the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seek to an absolute position
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Current position
    fn tell(&self) -> u64;

    /// Total size of the input
    fn size(&self) -> u64;

    /// Read the entire source from the beginning
    fn read_all(&mut self) -> Result<Bytes> {
        self.seek(0)?;
        let mut data = vec![0u8; self.size() as usize];
        let mut total = 0;
        while total < data.len() {
            let n = self.read(&mut data[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        data.truncate(total);
        Ok(Bytes::from(data))
    }
}

/// Memory-backed input source
pub struct BufferInputSource {
    name: String,
    data: Bytes,
    position: u64,
}

impl BufferInputSource {
    pub fn new<S: Into<String>, B: Into<Bytes>>(name: S, data: B) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            position: 0,
        }
    }
}

impl InputSource for BufferInputSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pos = self.position as usize;
        let remaining = self.data.len().saturating_sub(pos);
        let n = buf.len().min(remaining);
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.data.len() as u64 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek position beyond end of buffer",
            )));
        }
        self.position = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_all(&mut self) -> Result<Bytes> {
        self.position = self.data.len() as u64;
        Ok(self.data.clone())
    }
}

/// Memory-mapped file input source
pub struct FileInputSource {
    name: String,
    map: Mmap,
    position: u64,
}

impl FileInputSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let name = path.as_ref().display().to_string();
        let file = File::open(&path)?;
        // Safety: the mapping is read-only and held for the source's lifetime
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            name,
            map,
            position: 0,
        })
    }
}

impl InputSource for FileInputSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pos = self.position as usize;
        let remaining = self.map.len().saturating_sub(pos);
        let n = buf.len().min(remaining);
        buf[..n].copy_from_slice(&self.map[pos..pos + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.map.len() as u64 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek position beyond end of file",
            )));
        }
        self.position = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.map.len() as u64
    }

    fn read_all(&mut self) -> Result<Bytes> {
        self.position = self.map.len() as u64;
        Ok(Bytes::copy_from_slice(&self.map))
    }
}

/// Byte-range view over another input source
///
/// Positions are relative to the start of the window. Used for merged and
/// multi-file scenarios where one region of a larger source should behave
/// as a standalone file.
pub struct OffsetInputSource {
    name: String,
    inner: Box<dyn InputSource>,
    base: u64,
    length: u64,
    position: u64,
}

impl OffsetInputSource {
    pub fn new(inner: Box<dyn InputSource>, base: u64, length: u64) -> Result<Self> {
        if base + length > inner.size() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "offset window extends beyond underlying source",
            )));
        }
        let name = format!("{} (offset {})", inner.name(), base);
        Ok(Self {
            name,
            inner,
            base,
            length,
            position: 0,
        })
    }
}

impl InputSource for OffsetInputSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.length.saturating_sub(self.position) as usize;
        let n = buf.len().min(remaining);
        if n == 0 {
            return Ok(0);
        }
        self.inner.seek(self.base + self.position)?;
        let n = self.inner.read(&mut buf[..n])?;
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.length {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek position beyond offset window",
            )));
        }
        self.position = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_buffer_source_read_seek() {
        let mut src = BufferInputSource::new("test", &b"Hello, World!"[..]);
        let mut buf = [0u8; 5];
        assert_eq!(src.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");
        assert_eq!(src.tell(), 5);
        assert_eq!(src.size(), 13);

        src.seek(7).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(src.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"World!");
    }

    #[test]
    fn test_buffer_source_seek_past_end() {
        let mut src = BufferInputSource::new("test", &b"abc"[..]);
        assert!(src.seek(4).is_err());
    }

    #[test]
    fn test_buffer_source_read_all() {
        let mut src = BufferInputSource::new("test", &b"payload"[..]);
        assert_eq!(&src.read_all().unwrap()[..], b"payload");
    }

    #[test]
    fn test_file_source() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\nfile content").unwrap();
        f.flush().unwrap();

        let mut src = FileInputSource::open(f.path()).unwrap();
        assert_eq!(src.size(), 21);
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"%PDF-1.7");
        let all = src.read_all().unwrap();
        assert_eq!(all.len(), 21);
    }

    #[test]
    fn test_offset_source_window() {
        let inner = BufferInputSource::new("base", &b"xxxxWINDOWyyyy"[..]);
        let mut src = OffsetInputSource::new(Box::new(inner), 4, 6).unwrap();
        assert_eq!(src.size(), 6);
        assert_eq!(&src.read_all().unwrap()[..], b"WINDOW");

        src.seek(3).unwrap();
        let mut buf = [0u8; 16];
        let n = src.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"DOW");
    }

    #[test]
    fn test_offset_source_bounds() {
        let inner = BufferInputSource::new("base", &b"short"[..]);
        assert!(OffsetInputSource::new(Box::new(inner), 3, 10).is_err());
    }
}
