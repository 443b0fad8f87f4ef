//! Cross-reference stream field codec
//!
//! PDF 1.5+ cross-reference streams store the table as rows of binary
//! fields whose widths come from the stream's /W array, sliced into
//! subsections by /Index. This module converts between that packed form
//! and typed entries; locating and decompressing the stream itself is the
//! xref loader's job.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// One decoded cross-reference stream row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XrefStreamEntry {
    /// Row type: 0 = free, 1 = uncompressed, 2 = compressed
    pub kind: u8,
    /// Type 0: next free object; type 1: byte offset; type 2: object
    /// stream number
    pub field2: u64,
    /// Type 0: next generation; type 1: generation; type 2: index within
    /// the object stream
    pub field3: u32,
}

/// Field widths from the /W array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWidths {
    pub w: [usize; 3],
}

impl FieldWidths {
    pub fn new(w1: usize, w2: usize, w3: usize) -> Result<Self> {
        for (i, width) in [w1, w2, w3].into_iter().enumerate() {
            if width > 8 {
                return Err(Error::xref(format!(
                    "/W field {} width {} exceeds 8 bytes",
                    i, width
                )));
            }
        }
        if w2 == 0 {
            return Err(Error::xref("/W second field width must not be zero"));
        }
        Ok(Self { w: [w1, w2, w3] })
    }

    pub fn row_len(&self) -> usize {
        self.w.iter().sum()
    }
}

/// Decode packed rows into (object id, entry) pairs.
///
/// `index` lists (first object id, count) subsections, as the /Index array
/// does; the caller supplies `[(0, size)]` when /Index is absent.
pub fn decode_entries(
    data: &[u8],
    widths: FieldWidths,
    index: &[(i32, i32)],
) -> Result<Vec<(i32, XrefStreamEntry)>> {
    let row_len = widths.row_len();
    if row_len == 0 {
        return Err(Error::xref("/W describes empty rows"));
    }
    let expected: usize = index.iter().map(|&(_, count)| count.max(0) as usize).sum();
    if data.len() < expected * row_len {
        return Err(Error::xref(format!(
            "xref stream data holds {} rows, /Index declares {}",
            data.len() / row_len,
            expected
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut out = Vec::with_capacity(expected);
    for &(start, count) in index {
        if start < 0 || count < 0 {
            return Err(Error::xref("negative /Index subsection"));
        }
        for i in 0..count {
            let kind = match widths.w[0] {
                // a missing type field defaults to type 1
                0 => 1u64,
                n => cursor.read_uint::<BigEndian>(n)?,
            };
            let field2 = match widths.w[1] {
                0 => 0,
                n => cursor.read_uint::<BigEndian>(n)?,
            };
            let field3 = match widths.w[2] {
                0 => 0,
                n => cursor.read_uint::<BigEndian>(n)?,
            };
            let kind = u8::try_from(kind)
                .map_err(|_| Error::xref(format!("xref stream row type {} out of range", kind)))?;
            let field3 = u32::try_from(field3)
                .map_err(|_| Error::xref("xref stream third field out of range"))?;
            out.push((
                start + i,
                XrefStreamEntry {
                    kind,
                    field2,
                    field3,
                },
            ));
        }
    }
    Ok(out)
}

/// Encode entries for object ids `0..entries.len()` into packed rows,
/// choosing the narrowest widths that fit
pub fn encode_entries(entries: &[XrefStreamEntry]) -> Result<(FieldWidths, Vec<u8>)> {
    let max_field2 = entries.iter().map(|e| e.field2).max().unwrap_or(0);
    let max_field3 = entries.iter().map(|e| e.field3).max().unwrap_or(0);
    let widths = FieldWidths::new(1, bytes_needed(max_field2), bytes_needed(max_field3 as u64))?;

    let mut out = Vec::with_capacity(entries.len() * widths.row_len());
    for entry in entries {
        out.write_uint::<BigEndian>(entry.kind as u64, widths.w[0])?;
        out.write_uint::<BigEndian>(entry.field2, widths.w[1])?;
        out.write_uint::<BigEndian>(entry.field3 as u64, widths.w[2])?;
    }
    Ok((widths, out))
}

fn bytes_needed(value: u64) -> usize {
    let mut n = 1;
    let mut v = value >> 8;
    while v > 0 {
        n += 1;
        v >>= 8;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_widths_validation() {
        assert!(FieldWidths::new(1, 2, 1).is_ok());
        assert!(FieldWidths::new(1, 0, 1).is_err());
        assert!(FieldWidths::new(9, 2, 1).is_err());
    }

    #[test]
    fn test_decode_basic() {
        // W [1 2 1], two rows: free gen 65-ish and uncompressed
        let data = [
            0u8, 0x00, 0x00, 0x00, // type 0
            1, 0x01, 0x10, 0x00, // type 1, offset 0x110, gen 0
        ];
        let widths = FieldWidths::new(1, 2, 1).unwrap();
        let rows = decode_entries(&data, widths, &[(0, 2)]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 0);
        assert_eq!(rows[0].1.kind, 0);
        assert_eq!(rows[1].0, 1);
        assert_eq!(rows[1].1.kind, 1);
        assert_eq!(rows[1].1.field2, 0x110);
    }

    #[test]
    fn test_decode_multiple_subsections() {
        let data = [
            1u8, 0x00, 0x20, 0, // object 3
            2, 0x00, 0x07, 4, // object 10: in stream 7, index 4
        ];
        let widths = FieldWidths::new(1, 2, 1).unwrap();
        let rows = decode_entries(&data, widths, &[(3, 1), (10, 1)]).unwrap();
        assert_eq!(rows[0].0, 3);
        assert_eq!(rows[1].0, 10);
        assert_eq!(rows[1].1.kind, 2);
        assert_eq!(rows[1].1.field2, 7);
        assert_eq!(rows[1].1.field3, 4);
    }

    #[test]
    fn test_decode_zero_type_width_defaults_in_use() {
        let data = [0x12u8, 0x34];
        let widths = FieldWidths::new(0, 2, 0).unwrap();
        let rows = decode_entries(&data, widths, &[(5, 1)]).unwrap();
        assert_eq!(rows[0].1.kind, 1);
        assert_eq!(rows[0].1.field2, 0x1234);
    }

    #[test]
    fn test_decode_short_data_is_error() {
        let widths = FieldWidths::new(1, 2, 1).unwrap();
        assert!(decode_entries(&[0u8; 3], widths, &[(0, 2)]).is_err());
    }

    #[test]
    fn test_encode_round_trip() {
        let entries = vec![
            XrefStreamEntry {
                kind: 0,
                field2: 0,
                field3: 65535,
            },
            XrefStreamEntry {
                kind: 1,
                field2: 0x12345,
                field3: 0,
            },
            XrefStreamEntry {
                kind: 2,
                field2: 9,
                field3: 3,
            },
        ];
        let (widths, data) = encode_entries(&entries).unwrap();
        let rows = decode_entries(&data, widths, &[(0, entries.len() as i32)]).unwrap();
        for (i, (id, entry)) in rows.iter().enumerate() {
            assert_eq!(*id, i as i32);
            assert_eq!(entry, &entries[i]);
        }
    }

    #[test]
    fn test_bytes_needed() {
        assert_eq!(bytes_needed(0), 1);
        assert_eq!(bytes_needed(255), 1);
        assert_eq!(bytes_needed(256), 2);
        assert_eq!(bytes_needed(0x123456), 3);
    }
}
