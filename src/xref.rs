//! Cross-reference table
//!
//! Maps every known object identity to its storage location: free,
//! uncompressed at a byte offset, or compressed inside an object stream.
//! Two construction paths populate the same shape: the trusted path follows
//! the file's declared xref sections (classic tables, cross-reference
//! streams, and hybrids) newest-first with first-seen-wins merging, and the
//! recovery path brute-force scans the file for `N G obj` headers when the
//! declared structure fails its self-consistency checks.
//!
//! The loader walk itself lives on [`Document`](crate::Document), which
//! owns the parser the trailer dictionaries need; this module holds the
//! table and the byte-level pieces.

use crate::error::{Error, Result};
use crate::objgen::ObjGen;
use crate::tokenizer::{TokenKind, Tokenizer};
use std::collections::{HashMap, HashSet};

/// Storage location of one indirect object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Entry not in use
    Free,
    /// Object stored at a byte offset in the file
    Uncompressed { offset: u64 },
    /// Object packed into an object stream
    Compressed { stream: i32, index: u32 },
}

impl XrefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XrefEntry::Free)
    }
}

/// The cross-reference table
#[derive(Debug, Default)]
pub struct XrefTable {
    entries: HashMap<ObjGen, XrefEntry>,
    /// Object ids seen as free during the trusted load; a freed id blocks
    /// older sections from resurrecting the object
    deleted: HashSet<i32>,
    /// True when the table came from the brute-force scan
    reconstructed: bool,
}

impl XrefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with first-seen-wins semantics, matching incremental-update
    /// precedence when sections are loaded newest-first. Free rows mark the
    /// id deleted instead of storing an entry.
    pub fn insert_if_absent(&mut self, og: ObjGen, entry: XrefEntry) {
        if self.entries.contains_key(&og) || self.deleted.contains(&og.id) {
            return;
        }
        if entry.is_free() {
            self.deleted.insert(og.id);
        } else {
            self.entries.insert(og, entry);
        }
    }

    /// Insert with last-wins semantics, used by the recovery scan which
    /// reads the file beginning to end. The highest generation seen for an
    /// object id is authoritative.
    pub fn insert_overwrite(&mut self, og: ObjGen, entry: XrefEntry) {
        let stale: Vec<ObjGen> = self
            .entries
            .keys()
            .filter(|k| k.id == og.id && k.r#gen < og.r#gen)
            .copied()
            .collect();
        for k in stale {
            self.entries.remove(&k);
        }
        if self.entries.keys().any(|k| k.id == og.id && k.r#gen > og.r#gen) {
            return;
        }
        self.entries.insert(og, entry);
    }

    /// Materialize deferred free marks as Free entries for ids that no
    /// newer section defined
    pub fn finalize(&mut self) {
        let deleted = std::mem::take(&mut self.deleted);
        for id in deleted {
            let og = ObjGen::new(id, 0);
            if !self.entries.keys().any(|k| k.id == id) {
                self.entries.insert(og, XrefEntry::Free);
            }
        }
    }

    pub fn get(&self, og: ObjGen) -> Option<XrefEntry> {
        self.entries.get(&og).copied()
    }

    pub fn contains(&self, og: ObjGen) -> bool {
        self.entries.contains_key(&og)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest object id in the table
    pub fn max_id(&self) -> i32 {
        self.entries.keys().map(|og| og.id).max().unwrap_or(0)
    }

    /// All identities with real storage, in order
    pub fn populated_objects(&self) -> Vec<ObjGen> {
        let mut out: Vec<ObjGen> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_free())
            .map(|(og, _)| *og)
            .collect();
        out.sort();
        out
    }

    pub fn is_reconstructed(&self) -> bool {
        self.reconstructed
    }

    pub fn set_reconstructed(&mut self) {
        self.reconstructed = true;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.deleted.clear();
    }
}

// ============================================================================
// Byte-level structure helpers
// ============================================================================

/// Locate the startxref value near the end of the file
pub(crate) fn find_startxref(data: &[u8]) -> Result<u64> {
    let window = 1024.min(data.len());
    let tail_start = data.len() - window;
    let tail = &data[tail_start..];

    let pos = tail
        .windows(9)
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::xref("can't find startxref"))?;

    let mut tok = Tokenizer::at(data, tail_start + pos + 9);
    match tok.next_token().kind {
        TokenKind::Integer(v) if v >= 0 => Ok(v as u64),
        _ => Err(Error::xref("startxref not followed by a valid offset")),
    }
}

/// One row of a classic xref section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClassicEntry {
    pub id: i32,
    pub r#gen: i32,
    pub offset: u64,
    pub in_use: bool,
}

/// A parsed classic xref section, up to its trailer keyword
#[derive(Debug)]
pub(crate) struct ClassicXrefSection {
    pub entries: Vec<ClassicEntry>,
    /// Position immediately after the `trailer` keyword
    pub trailer_offset: usize,
}

/// Parse a classic `xref` section starting at `offset`
pub(crate) fn parse_classic_section(data: &[u8], offset: usize) -> Result<ClassicXrefSection> {
    let mut tok = Tokenizer::at(data, offset);
    if !tok.next_token().is_word("xref") {
        return Err(Error::xref(format!(
            "expected xref keyword at offset {}",
            offset
        )));
    }

    let mut entries = Vec::new();
    loop {
        let token = tok.next_token();
        if token.is_word("trailer") {
            return Ok(ClassicXrefSection {
                entries,
                trailer_offset: tok.pos(),
            });
        }
        let start = match token.kind {
            TokenKind::Integer(v) if v >= 0 => v as i32,
            _ => {
                return Err(Error::xref(format!(
                    "xref subsection header invalid at offset {}",
                    token.offset
                )));
            }
        };
        let count = match tok.next_token().kind {
            TokenKind::Integer(v) if v >= 0 => v as i32,
            _ => {
                return Err(Error::xref(format!(
                    "xref subsection count invalid at offset {}",
                    token.offset
                )));
            }
        };

        for i in 0..count {
            let offset_tok = tok.next_token();
            let gen_tok = tok.next_token();
            let kind_tok = tok.next_token();

            let (Some(entry_offset), Some(r#gen)) =
                (offset_tok.as_integer(), gen_tok.as_integer())
            else {
                return Err(Error::xref(format!(
                    "invalid xref entry for object {}",
                    start + i
                )));
            };
            let in_use = if kind_tok.is_word("n") {
                true
            } else if kind_tok.is_word("f") {
                false
            } else {
                return Err(Error::xref(format!(
                    "xref entry type for object {} is neither n nor f",
                    start + i
                )));
            };
            entries.push(ClassicEntry {
                id: start + i,
                r#gen: r#gen as i32,
                offset: entry_offset.max(0) as u64,
                in_use,
            });
        }
    }
}

/// True when `offset` lands on an `<id> <gen> obj` header for `og`
pub(crate) fn offset_points_at(data: &[u8], offset: u64, og: ObjGen) -> bool {
    let Ok(offset) = usize::try_from(offset) else {
        return false;
    };
    if offset >= data.len() {
        return false;
    }
    let mut tok = Tokenizer::at(data, offset);
    tok.next_token().as_integer() == Some(og.id as i64)
        && tok.next_token().as_integer() == Some(og.r#gen as i64)
        && tok.next_token().is_word("obj")
}

/// An object header found by the recovery scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScannedObject {
    pub og: ObjGen,
    pub offset: u64,
}

/// Brute-force scan for `N G obj` headers at line starts, the recovery
/// path's raw material. Later occurrences in the byte stream are appended
/// updates and must win, which the caller gets by inserting in scan order.
pub(crate) fn scan_object_headers(data: &[u8]) -> Vec<ScannedObject> {
    let mut out = Vec::new();
    let mut line_start = 0usize;
    while line_start < data.len() {
        let line_end = data[line_start..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .map(|p| line_start + p)
            .unwrap_or(data.len());

        if let Some(found) = match_object_header(&data[line_start..line_end]) {
            out.push(ScannedObject {
                og: found,
                offset: line_start as u64,
            });
        }

        line_start = line_end + 1;
        // swallow the LF of a CRLF pair
        if line_start < data.len() && data.get(line_start - 1) == Some(&b'\r')
            && data.get(line_start) == Some(&b'\n')
        {
            line_start += 1;
        }
    }
    out
}

/// Match `^(\d+) (\d+) obj\b` against one line
fn match_object_header(line: &[u8]) -> Option<ObjGen> {
    let mut tok = Tokenizer::new(line);
    let id = tok.next_token().as_integer()?;
    let r#gen = tok.next_token().as_integer()?;
    if !tok.next_token().is_word("obj") {
        return None;
    }
    let (id, r#gen) = (i32::try_from(id).ok()?, i32::try_from(r#gen).ok()?);
    if id < 1 || r#gen < 0 {
        return None;
    }
    Some(ObjGen::new(id, r#gen))
}

/// Offsets of `trailer` keywords at line starts, for recovery
pub(crate) fn scan_trailers(data: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut line_start = 0usize;
    while line_start < data.len() {
        let line_end = data[line_start..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .map(|p| line_start + p)
            .unwrap_or(data.len());
        let line = &data[line_start..line_end];
        if line.starts_with(b"trailer") {
            out.push(line_start + 7);
        }
        line_start = line_end + 1;
    }
    out
}
