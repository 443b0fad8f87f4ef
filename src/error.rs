//! Error handling for corepdf
//!
//! The crate distinguishes four classes of failure. Damage in the input file
//! is downgraded to a [`Warning`] recorded on the document wherever a
//! best-effort substitute exists (a null object, a re-scanned stream length).
//! Usage errors (wrong-type access, nonexistent object ids) and fatal errors
//! (no trailer, unreadable input, missing password) propagate as [`Error`]
//! values. Internal invariant violations get their own variant so a bug in
//! this crate is never mistaken for a damaged file.

use crate::objgen::ObjGen;
use std::fmt;
use std::io;
use thiserror::Error;

/// The main error type for corepdf operations
#[derive(Error, Debug)]
pub enum Error {
    /// Object-level syntax failure while parsing
    #[error("parse error: {0}")]
    Parse(String),
    /// Cross-reference table structure failure
    #[error("xref error: {0}")]
    Xref(String),
    /// Parser resource limit exceeded (nesting depth, token run, container size)
    #[error("limit exceeded: {0}")]
    Limit(String),
    /// An accessor was invoked on the wrong value variant
    #[error("operation for {expected} attempted on object of type {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Numeric narrowing would lose information
    #[error("integer out of range: {0}")]
    Range(String),
    /// Object id requested that the file does not define
    #[error("object {0} not found")]
    NotFound(ObjGen),
    /// The input is not a PDF file at all
    #[error("not a PDF file: {0}")]
    NotPdf(String),
    /// No trailer dictionary could be located, even after reconstruction
    #[error("unable to find trailer dictionary: {0}")]
    NoTrailer(String),
    /// The file is encrypted and no usable decryption capability was supplied
    #[error("password error: {0}")]
    Password(String),
    /// I/O failure in the byte source or sink
    #[error("system error: {0}")]
    Io(#[from] io::Error),
    /// Operation attempted on a handle whose owning document was torn down
    #[error("operation attempted on a destroyed object")]
    Destroyed,
    /// Feature present in the file that this crate does not implement
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A bug in corepdf itself, never caused by input data
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }
    pub fn xref<S: Into<String>>(msg: S) -> Self {
        Error::Xref(msg.into())
    }
    pub fn limit<S: Into<String>>(msg: S) -> Self {
        Error::Limit(msg.into())
    }
    pub fn range<S: Into<String>>(msg: S) -> Self {
        Error::Range(msg.into())
    }
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// True for errors that abort the whole open/write operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NotPdf(_) | Error::NoTrailer(_) | Error::Password(_) | Error::Io(_)
        )
    }

    /// True for errors indicating a caller mistake rather than bad input
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::TypeMismatch { .. } | Error::Range(_) | Error::NotFound(_) | Error::Destroyed
        )
    }

    /// True for errors indicating a bug in this crate
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A recoverable problem found in the input file
///
/// Warnings accumulate on the owning [`Document`](crate::Document) and are
/// retrievable after an operation completes. They never interrupt
/// processing; the object that triggered one has already been replaced by a
/// best-effort substitute.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Warning {
    /// Name of the input source the warning refers to
    pub source: String,
    /// Byte offset in the source where the problem was observed
    pub offset: u64,
    /// Human-readable description
    pub message: String,
}

impl Warning {
    pub fn new<S: Into<String>, M: Into<String>>(source: S, offset: u64, message: M) -> Self {
        Self {
            source: source.into(),
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (offset {}): {}", self.source, self.offset, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_parse() {
        let e = Error::parse("bad token");
        assert!(matches!(e, Error::Parse(_)));
        assert!(format!("{}", e).contains("bad token"));
        assert!(!e.is_fatal());
        assert!(!e.is_usage());
    }

    #[test]
    fn test_error_type_mismatch() {
        let e = Error::TypeMismatch {
            expected: "integer",
            actual: "dictionary",
        };
        assert!(e.is_usage());
        let msg = format!("{}", e);
        assert!(msg.contains("integer"));
        assert!(msg.contains("dictionary"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::NoTrailer("x".into()).is_fatal());
        assert!(Error::Password("required".into()).is_fatal());
        assert!(Error::NotFound(ObjGen::new(3, 0)).is_usage());
        assert!(Error::Destroyed.is_usage());
        assert!(Error::internal("slot in impossible state").is_internal());
        assert!(!Error::xref("circular /Prev").is_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let ioe = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let e: Error = ioe.into();
        assert!(e.is_fatal());
    }

    #[test]
    fn test_warning_display() {
        let w = Warning::new("test.pdf", 42, "duplicate dictionary key /Type");
        let s = format!("{}", w);
        assert!(s.contains("test.pdf"));
        assert!(s.contains("42"));
        assert!(s.contains("/Type"));
    }
}
