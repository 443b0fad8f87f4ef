//! corepdf - PDF object model and cross-reference resolution engine
//!
//! This crate implements the representation, resolution, and recovery core
//! beneath a PDF processing stack: an in-memory graph of typed objects,
//! lazy dereferencing of indirect references with cycle detection, a
//! cross-reference table that survives damaged files, and a writer that
//! re-serializes the graph into a valid output file.
//!
//! # Modules
//!
//! - `object` - the tagged value union and the shared object handle
//! - `objgen` - (object number, generation) identities
//! - `tokenizer` - byte-level lexer producing offset-tagged tokens
//! - `parser` - frame-stack object parser with damage recovery
//! - `xref` - cross-reference table, trusted load and reconstruction
//! - `xref_stream` - packed cross-reference stream field codec
//! - `document` - open lifecycle, object cache, lazy resolver
//! - `stream` - lazy stream payloads and filter-chain decoding
//! - `pipeline` - composable write/finish byte stream stages
//! - `writer` - renumbering serializer with object-stream packing and
//!   linearization
//! - `json` - object graph reflection for tooling
//!
//! # Example
//!
//! ```rust,ignore
//! use corepdf::{Document, Writer, WriteOptions};
//!
//! let doc = Document::open_file("in.pdf")?;
//! let root = doc.trailer().dict_get("Root")?;
//! println!("catalog type: {}", root.dict_get("Type")?.as_name()?);
//!
//! let mut out = std::fs::File::create("out.pdf")?;
//! Writer::new(&doc, WriteOptions::default()).write_to(&mut out)?;
//! ```

pub mod crypt;
pub mod document;
pub mod error;
pub mod input;
pub mod json;
pub mod object;
pub mod objgen;
pub mod parser;
pub mod pipeline;
pub mod stream;
pub mod tokenizer;
pub mod writer;
pub mod xref;
pub mod xref_stream;

#[cfg(test)]
pub(crate) mod test_pdf;

// ============================================================================
// Error types
// ============================================================================
pub use error::{Error, Result, Warning};

// ============================================================================
// Object model
// ============================================================================
pub use object::{Array, Dict, Name, Object, PdfString, Value};
pub use objgen::ObjGen;
pub use stream::{StreamProvider, StreamSource, StreamValue};

// ============================================================================
// Documents - open, resolve, inspect
// ============================================================================
pub use document::{Document, OpenOptions};
pub use parser::{ParseMode, ParserLimits, parse_content};

// ============================================================================
// Input sources
// ============================================================================
pub use input::{BufferInputSource, FileInputSource, InputSource, OffsetInputSource};

// ============================================================================
// Pipelines - chainable stream processing stages
// ============================================================================
pub use pipeline::{
    BufferHandle, CountHandle, FlateAction, Pipeline, PipelineBox, PlAscii85Decoder,
    PlAsciiHexDecoder, PlBuffer, PlCount, PlDiscard, PlFlate, PlPredictor, PlRunLengthDecoder,
    PredictorParams,
};

// ============================================================================
// Decryption capability
// ============================================================================
pub use crypt::{IdentityDecrypter, StringDecrypter};

// ============================================================================
// Cross-reference structures
// ============================================================================
pub use xref::{XrefEntry, XrefTable};
pub use xref_stream::{FieldWidths, XrefStreamEntry};

// ============================================================================
// Writing
// ============================================================================
pub use writer::{ObjectStreamMode, StreamDataMode, WriteOptions, Writer, XrefMode};

// ============================================================================
// JSON reflection
// ============================================================================
pub use json::{document_to_json, object_to_json};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
