//! PDF object model
//!
//! The [`Value`] tagged union covers every PDF primitive plus three control
//! variants used by the lazy loader: `Reserved` (internal placeholder while
//! circular structures are under construction), `Unresolved` (an indirect
//! object that has not been loaded yet) and `Destroyed` (the owning
//! document was torn down; stale handles fail loudly instead of reading
//! freed data).
//!
//! [`Object`] is the handle application code works with: a cheap, clonable
//! reference-counted pointer to a slot holding the current value. All
//! handles for one indirect object share a single slot, so resolving or
//! mutating through any handle is observed by every other handle.

use crate::error::{Error, Result};
use crate::objgen::ObjGen;
use crate::stream::StreamValue;
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

// ============================================================================
// Interned Name Implementation
// ============================================================================

/// Interned PDF name with shared storage
///
/// PDF names repeat constantly (Type, Length, Filter, ...). `Arc<str>`
/// storage makes cloning free, and the most common names are pre-interned
/// so equality is usually a pointer comparison.
#[derive(Debug, Clone, Eq)]
pub struct Name(Arc<str>);

impl Name {
    /// Create a new name, sharing storage with pre-interned names
    pub fn new(s: &str) -> Self {
        if let Some(interned) = Self::get_interned(s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    /// Create from an owned String
    pub fn from_string(s: String) -> Self {
        if let Some(interned) = Self::get_interned(&s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    /// The name text, without the leading slash
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn get_interned(s: &str) -> Option<Self> {
        COMMON_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, arc)| Self(Arc::clone(arc)))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.as_ref() == other.0.as_ref()
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

use std::sync::LazyLock;

/// Names common in file structure work, pre-interned for fast comparison
static COMMON_NAMES: LazyLock<Vec<(&'static str, Arc<str>)>> = LazyLock::new(|| {
    vec![
        ("Type", Arc::from("Type")),
        ("Subtype", Arc::from("Subtype")),
        ("Length", Arc::from("Length")),
        ("Filter", Arc::from("Filter")),
        ("DecodeParms", Arc::from("DecodeParms")),
        // Trailer and xref structure
        ("Root", Arc::from("Root")),
        ("Info", Arc::from("Info")),
        ("ID", Arc::from("ID")),
        ("Size", Arc::from("Size")),
        ("Prev", Arc::from("Prev")),
        ("XRefStm", Arc::from("XRefStm")),
        ("XRef", Arc::from("XRef")),
        ("W", Arc::from("W")),
        ("Index", Arc::from("Index")),
        ("Encrypt", Arc::from("Encrypt")),
        // Object streams
        ("ObjStm", Arc::from("ObjStm")),
        ("N", Arc::from("N")),
        ("First", Arc::from("First")),
        ("Extends", Arc::from("Extends")),
        // Document structure
        ("Catalog", Arc::from("Catalog")),
        ("Pages", Arc::from("Pages")),
        ("Page", Arc::from("Page")),
        ("Kids", Arc::from("Kids")),
        ("Count", Arc::from("Count")),
        ("Parent", Arc::from("Parent")),
        ("Contents", Arc::from("Contents")),
        ("Resources", Arc::from("Resources")),
        ("MediaBox", Arc::from("MediaBox")),
        // Filters
        ("FlateDecode", Arc::from("FlateDecode")),
        ("ASCIIHexDecode", Arc::from("ASCIIHexDecode")),
        ("ASCII85Decode", Arc::from("ASCII85Decode")),
        ("RunLengthDecode", Arc::from("RunLengthDecode")),
        ("LZWDecode", Arc::from("LZWDecode")),
        ("DCTDecode", Arc::from("DCTDecode")),
        // Predictor parameters
        ("Predictor", Arc::from("Predictor")),
        ("Columns", Arc::from("Columns")),
        ("Colors", Arc::from("Colors")),
        ("BitsPerComponent", Arc::from("BitsPerComponent")),
        // Linearization
        ("Linearized", Arc::from("Linearized")),
    ]
});

// ============================================================================
// Strings
// ============================================================================

/// A PDF string: raw bytes, possibly binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString(Vec<u8>);

impl PdfString {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    pub fn as_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for PdfString {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl From<&str> for PdfString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

pub type Dict = HashMap<Name, Object>;
pub type Array = Vec<Object>;

// ============================================================================
// Value
// ============================================================================

/// The tagged union behind every object handle
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    /// Reals keep their original decimal text so unparsing reproduces the
    /// input exactly ("1.10" stays "1.10")
    Real(String),
    String(PdfString),
    Name(Name),
    /// Content-stream operator keyword
    Operator(String),
    /// Raw inline image payload from a content stream
    InlineImage(Bytes),
    Array(Array),
    Dictionary(Dict),
    Stream(StreamValue),
    /// Internal placeholder while mutually referencing objects are being
    /// constructed; must never escape the parser
    Reserved,
    /// Declared but not yet loaded; carries the owning document so the
    /// handle can resolve itself on first access
    Unresolved(Weak<crate::document::DocumentState>),
    /// The owning document was torn down
    Destroyed,
}

impl Value {
    /// Short type label used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::String(_) => "string",
            Value::Name(_) => "name",
            Value::Operator(_) => "operator",
            Value::InlineImage(_) => "inline-image",
            Value::Array(_) => "array",
            Value::Dictionary(_) => "dictionary",
            Value::Stream(_) => "stream",
            Value::Reserved => "reserved",
            Value::Unresolved(_) => "unresolved",
            Value::Destroyed => "destroyed",
        }
    }
}

// ============================================================================
// Object handle
// ============================================================================

/// One shared storage cell: the object's identity plus its current value
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) og: ObjGen,
    pub(crate) value: Value,
}

/// Shared-ownership handle to a PDF object
///
/// Cloning a handle is cheap and never copies the value. Handles obtained
/// for the same indirect object alias one slot; a direct object
/// (`ObjGen::DIRECT`) owns its slot uniquely.
#[derive(Debug, Clone)]
pub struct Object {
    slot: Rc<RefCell<Slot>>,
}

impl Object {
    // ----- constructors -----

    fn direct(value: Value) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot {
                og: ObjGen::DIRECT,
                value,
            })),
        }
    }

    pub fn null() -> Self {
        Self::direct(Value::Null)
    }

    pub fn boolean(v: bool) -> Self {
        Self::direct(Value::Boolean(v))
    }

    pub fn integer(v: i64) -> Self {
        Self::direct(Value::Integer(v))
    }

    /// Real from its decimal text, e.g. `"1.10"`
    pub fn real<S: Into<String>>(text: S) -> Self {
        Self::direct(Value::Real(text.into()))
    }

    /// Real from a float; trailing zeros are trimmed
    pub fn real_from_f64(v: f64) -> Self {
        let mut text = format!("{:.6}", v);
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.push('0');
        }
        Self::direct(Value::Real(text))
    }

    pub fn string<B: Into<Vec<u8>>>(data: B) -> Self {
        Self::direct(Value::String(PdfString::new(data.into())))
    }

    pub fn name(name: &str) -> Self {
        Self::direct(Value::Name(Name::new(name)))
    }

    pub fn operator<S: Into<String>>(op: S) -> Self {
        Self::direct(Value::Operator(op.into()))
    }

    pub fn array(items: Array) -> Self {
        Self::direct(Value::Array(items))
    }

    pub fn dictionary(entries: Dict) -> Self {
        Self::direct(Value::Dictionary(entries))
    }

    pub fn from_value(value: Value) -> Self {
        Self::direct(value)
    }

    /// Parse a single object out of a byte buffer with no owning document.
    ///
    /// Returns the object and whether the input contained nothing but
    /// whitespace and comments. Indirect references are not meaningful
    /// without a document and are rejected.
    pub fn parse(data: &[u8], description: &str) -> Result<(Object, bool)> {
        crate::parser::parse_standalone(data, description)
    }

    pub(crate) fn with_og(og: ObjGen, value: Value) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot { og, value })),
        }
    }

    pub(crate) fn unresolved(og: ObjGen, doc: Weak<crate::document::DocumentState>) -> Self {
        Self::with_og(og, Value::Unresolved(doc))
    }

    // ----- identity -----

    /// The (object number, generation) identity; `ObjGen::DIRECT` for
    /// direct objects
    pub fn og(&self) -> ObjGen {
        self.slot.borrow().og
    }

    pub fn is_indirect(&self) -> bool {
        self.og().is_indirect()
    }

    /// True when both handles alias the same slot
    pub fn same_slot(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    // ----- resolution -----

    /// Resolve the handle in place if it is an unresolved stub.
    ///
    /// All aliasing handles observe the resolved value because resolution
    /// rewrites the shared slot, not this handle.
    pub fn resolve(&self) -> Result<()> {
        let doc = {
            let slot = self.slot.borrow();
            match &slot.value {
                Value::Unresolved(doc) => doc.clone(),
                Value::Destroyed => return Err(Error::Destroyed),
                _ => return Ok(()),
            }
        };
        let og = self.og();
        let doc = doc.upgrade().ok_or(Error::Destroyed)?;
        doc.resolve_og(og)
    }

    /// Run `f` against the resolved value
    pub(crate) fn with_value<T>(&self, f: impl FnOnce(&Value) -> Result<T>) -> Result<T> {
        self.resolve()?;
        let slot = self.slot.borrow();
        match &slot.value {
            Value::Destroyed => Err(Error::Destroyed),
            Value::Reserved => Err(Error::internal(
                "reserved object observed outside parser bookkeeping",
            )),
            v => f(v),
        }
    }

    fn with_value_mut<T>(&self, f: impl FnOnce(&mut Value) -> Result<T>) -> Result<T> {
        self.resolve()?;
        let mut slot = self.slot.borrow_mut();
        match &mut slot.value {
            Value::Destroyed => Err(Error::Destroyed),
            Value::Reserved => Err(Error::internal(
                "reserved object observed outside parser bookkeeping",
            )),
            v => f(v),
        }
    }

    /// Replace the slot's value, leaving the identity untouched
    pub(crate) fn set_value(&self, value: Value) {
        self.slot.borrow_mut().value = value;
    }

    pub(crate) fn borrow_slot_mut(&self) -> std::cell::RefMut<'_, Slot> {
        self.slot.borrow_mut()
    }

    /// Assign an indirect identity to a direct object's slot
    pub(crate) fn set_og(&self, og: ObjGen) {
        self.slot.borrow_mut().og = og;
    }

    /// Clone the current value without resolving
    pub(crate) fn raw_value(&self) -> Value {
        self.slot.borrow().value.clone()
    }

    /// Swap in the destroyed marker so stale handles fail loudly
    pub(crate) fn destroy(&self) {
        self.slot.borrow_mut().value = Value::Destroyed;
    }

    // ----- type predicates -----

    /// Resolved type label
    pub fn type_name(&self) -> Result<&'static str> {
        self.with_value(|v| Ok(v.type_name()))
    }

    pub fn is_null(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Null)))
    }
    pub fn is_boolean(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Boolean(_))))
    }
    pub fn is_integer(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Integer(_))))
    }
    pub fn is_real(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Real(_))))
    }
    /// Integer or real
    pub fn is_number(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Integer(_) | Value::Real(_))))
    }
    pub fn is_string(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::String(_))))
    }
    pub fn is_name(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Name(_))))
    }
    pub fn is_operator(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Operator(_))))
    }
    pub fn is_array(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Array(_))))
    }
    pub fn is_dictionary(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Dictionary(_))))
    }
    pub fn is_stream(&self) -> Result<bool> {
        self.with_value(|v| Ok(matches!(v, Value::Stream(_))))
    }

    // ----- scalar accessors -----

    pub fn as_bool(&self) -> Result<bool> {
        self.with_value(|v| match v {
            Value::Boolean(b) => Ok(*b),
            other => Err(Error::TypeMismatch {
                expected: "boolean",
                actual: other.type_name(),
            }),
        })
    }

    pub fn as_int(&self) -> Result<i64> {
        self.with_value(|v| match v {
            Value::Integer(i) => Ok(*i),
            other => Err(Error::TypeMismatch {
                expected: "integer",
                actual: other.type_name(),
            }),
        })
    }

    /// Integer narrowed to i32; out-of-range values are an error, never a
    /// silent truncation
    pub fn as_i32(&self) -> Result<i32> {
        let v = self.as_int()?;
        i32::try_from(v).map_err(|_| Error::range(format!("{} does not fit in i32", v)))
    }

    pub fn as_u32(&self) -> Result<u32> {
        let v = self.as_int()?;
        u32::try_from(v).map_err(|_| Error::range(format!("{} does not fit in u32", v)))
    }

    /// The real's original decimal text
    pub fn as_real_text(&self) -> Result<String> {
        self.with_value(|v| match v {
            Value::Real(t) => Ok(t.clone()),
            other => Err(Error::TypeMismatch {
                expected: "real",
                actual: other.type_name(),
            }),
        })
    }

    /// Numeric value of an integer or real
    pub fn as_f64(&self) -> Result<f64> {
        self.with_value(|v| match v {
            Value::Integer(i) => Ok(*i as f64),
            Value::Real(t) => t
                .parse::<f64>()
                .map_err(|_| Error::range(format!("invalid real value {}", t))),
            other => Err(Error::TypeMismatch {
                expected: "number",
                actual: other.type_name(),
            }),
        })
    }

    pub fn as_string(&self) -> Result<PdfString> {
        self.with_value(|v| match v {
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::TypeMismatch {
                expected: "string",
                actual: other.type_name(),
            }),
        })
    }

    pub fn as_name(&self) -> Result<Name> {
        self.with_value(|v| match v {
            Value::Name(n) => Ok(n.clone()),
            other => Err(Error::TypeMismatch {
                expected: "name",
                actual: other.type_name(),
            }),
        })
    }

    pub fn as_operator(&self) -> Result<String> {
        self.with_value(|v| match v {
            Value::Operator(op) => Ok(op.clone()),
            other => Err(Error::TypeMismatch {
                expected: "operator",
                actual: other.type_name(),
            }),
        })
    }

    // ----- array accessors and mutation -----

    /// Shallow clone of the element handles
    pub fn as_array(&self) -> Result<Array> {
        self.with_value(|v| match v {
            Value::Array(items) => Ok(items.clone()),
            other => Err(Error::TypeMismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        })
    }

    pub fn array_len(&self) -> Result<usize> {
        self.with_value(|v| match v {
            Value::Array(items) => Ok(items.len()),
            other => Err(Error::TypeMismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        })
    }

    pub fn array_get(&self, index: usize) -> Result<Object> {
        self.with_value(|v| match v {
            Value::Array(items) => items
                .get(index)
                .cloned()
                .ok_or_else(|| Error::range(format!("array index {} out of bounds", index))),
            other => Err(Error::TypeMismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        })
    }

    pub fn array_append(&self, item: Object) -> Result<()> {
        self.with_value_mut(|v| match v {
            Value::Array(items) => {
                items.push(item);
                Ok(())
            }
            other => Err(Error::TypeMismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        })
    }

    pub fn array_insert(&self, index: usize, item: Object) -> Result<()> {
        self.with_value_mut(|v| match v {
            Value::Array(items) => {
                if index > items.len() {
                    return Err(Error::range(format!("array index {} out of bounds", index)));
                }
                items.insert(index, item);
                Ok(())
            }
            other => Err(Error::TypeMismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        })
    }

    pub fn array_erase(&self, index: usize) -> Result<()> {
        self.with_value_mut(|v| match v {
            Value::Array(items) => {
                if index >= items.len() {
                    return Err(Error::range(format!("array index {} out of bounds", index)));
                }
                items.remove(index);
                Ok(())
            }
            other => Err(Error::TypeMismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        })
    }

    // ----- dictionary accessors and mutation -----
    //
    // These operate on dictionaries and on streams; for a stream they
    // address its metadata dictionary, never its payload.

    fn with_dict<T>(&self, expected: &'static str, f: impl FnOnce(&Dict) -> T) -> Result<T> {
        self.with_value(|v| match v {
            Value::Dictionary(d) => Ok(f(d)),
            Value::Stream(s) => Ok(f(&s.dict)),
            other => Err(Error::TypeMismatch {
                expected,
                actual: other.type_name(),
            }),
        })
    }

    fn with_dict_mut<T>(
        &self,
        expected: &'static str,
        f: impl FnOnce(&mut Dict) -> T,
    ) -> Result<T> {
        self.with_value_mut(|v| match v {
            Value::Dictionary(d) => Ok(f(d)),
            Value::Stream(s) => Ok(f(&mut s.dict)),
            other => Err(Error::TypeMismatch {
                expected,
                actual: other.type_name(),
            }),
        })
    }

    /// Shallow clone of the entries
    pub fn as_dict(&self) -> Result<Dict> {
        self.with_dict("dictionary", |d| d.clone())
    }

    /// Value for `key`, or a null object if the key is absent
    pub fn dict_get(&self, key: &str) -> Result<Object> {
        self.with_dict("dictionary", |d| {
            d.get(&Name::new(key)).cloned().unwrap_or_else(Object::null)
        })
    }

    pub fn dict_has(&self, key: &str) -> Result<bool> {
        self.with_dict("dictionary", |d| d.contains_key(&Name::new(key)))
    }

    /// Keys in sorted order
    pub fn dict_keys(&self) -> Result<Vec<Name>> {
        self.with_dict("dictionary", |d| {
            let mut keys: Vec<Name> = d.keys().cloned().collect();
            keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            keys
        })
    }

    pub fn replace_key(&self, key: &str, value: Object) -> Result<()> {
        self.with_dict_mut("dictionary", |d| {
            d.insert(Name::new(key), value);
        })
    }

    pub fn remove_key(&self, key: &str) -> Result<()> {
        self.with_dict_mut("dictionary", |d| {
            d.remove(&Name::new(key));
        })
    }

    // ----- copying -----

    /// New direct object whose container cells still point at the same
    /// child handles. Children remain shared; this is not a deep copy.
    pub fn shallow_copy(&self) -> Result<Object> {
        self.with_value(|v| match v {
            Value::Array(items) => Ok(Object::array(items.clone())),
            Value::Dictionary(d) => Ok(Object::dictionary(d.clone())),
            Value::Stream(s) => Ok(Object::direct(Value::Stream(s.clone()))),
            scalar => Ok(Object::direct(scalar.clone())),
        })
    }

    // ----- serialization -----

    /// Serialize this object. Indirect objects unparse to their reference
    /// (`id gen R`); direct objects unparse to their full content.
    pub fn unparse(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if self.is_indirect() {
            self.write_reference(None, &mut out)?;
        } else {
            self.write_content(None, &mut out)?;
        }
        Ok(out)
    }

    /// Serialize this object's content even if it is indirect
    pub fn unparse_resolved(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_content(None, &mut out)?;
        Ok(out)
    }

    /// Serialize content with object numbers rewritten through `map`.
    /// References whose target is not in the map unparse to `null`.
    pub(crate) fn unparse_mapped(
        &self,
        map: &dyn Fn(ObjGen) -> Option<ObjGen>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_content(Some(map), &mut out)?;
        Ok(out)
    }

    fn write_reference(
        &self,
        map: Option<&dyn Fn(ObjGen) -> Option<ObjGen>>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let og = self.og();
        match map {
            Some(map) => match map(og) {
                Some(mapped) => out.extend_from_slice(format!("{} {} R", mapped.id, mapped.r#gen).as_bytes()),
                None => out.extend_from_slice(b"null"),
            },
            None => out.extend_from_slice(format!("{} {} R", og.id, og.r#gen).as_bytes()),
        }
        Ok(())
    }

    fn write_child(
        &self,
        map: Option<&dyn Fn(ObjGen) -> Option<ObjGen>>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if self.is_indirect() {
            self.write_reference(map, out)
        } else {
            self.write_content(map, out)
        }
    }

    fn write_content(
        &self,
        map: Option<&dyn Fn(ObjGen) -> Option<ObjGen>>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        // Clone the value out so child slots can be borrowed during
        // recursion
        let value = {
            self.resolve()?;
            self.slot.borrow().value.clone()
        };
        match value {
            Value::Destroyed => return Err(Error::Destroyed),
            Value::Reserved | Value::Unresolved(_) => {
                return Err(Error::internal("unparse of unresolved or reserved object"));
            }
            Value::Null => out.extend_from_slice(b"null"),
            Value::Boolean(true) => out.extend_from_slice(b"true"),
            Value::Boolean(false) => out.extend_from_slice(b"false"),
            Value::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
            Value::Real(t) => out.extend_from_slice(t.as_bytes()),
            Value::String(s) => write_string_escaped(s.as_bytes(), out),
            Value::Name(n) => write_name_escaped(n.as_str(), out),
            Value::Operator(op) => out.extend_from_slice(op.as_bytes()),
            Value::InlineImage(data) => out.extend_from_slice(&data),
            Value::Array(items) => {
                out.extend_from_slice(b"[ ");
                for item in &items {
                    item.write_child(map, out)?;
                    out.push(b' ');
                }
                out.push(b']');
            }
            Value::Dictionary(d) => write_dict(&d, map, out)?,
            // A stream's content form is its dictionary; the payload is
            // emitted by the writer, which owns /Length bookkeeping
            Value::Stream(s) => write_dict(&s.dict, map, out)?,
        }
        Ok(())
    }
}

fn write_dict(
    dict: &Dict,
    map: Option<&dyn Fn(ObjGen) -> Option<ObjGen>>,
    out: &mut Vec<u8>,
) -> Result<()> {
    // Sorted keys keep output deterministic across runs
    let mut keys: Vec<&Name> = dict.keys().collect();
    keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    out.extend_from_slice(b"<< ");
    for key in keys {
        write_name_escaped(key.as_str(), out);
        out.push(b' ');
        dict[key].write_child(map, out)?;
        out.push(b' ');
    }
    out.extend_from_slice(b">>");
    Ok(())
}

/// Escape a string into literal `(...)` form; binary bytes become octal
/// escapes
fn write_string_escaped(data: &[u8], out: &mut Vec<u8>) {
    out.push(b'(');
    for &b in data {
        match b {
            b'(' => out.extend_from_slice(b"\\("),
            b')' => out.extend_from_slice(b"\\)"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            0x20..=0x7e => out.push(b),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            _ => out.extend_from_slice(format!("\\{:03o}", b).as_bytes()),
        }
    }
    out.push(b')');
}

/// Escape a name; characters outside the regular range become `#xx`
fn write_name_escaped(name: &str, out: &mut Vec<u8>) {
    out.push(b'/');
    for &b in name.as_bytes() {
        let needs_escape = b == b'#'
            || b < 0x21
            || b > 0x7e
            || crate::tokenizer::is_delimiter(b);
        if needs_escape {
            out.extend_from_slice(format!("#{:02X}", b).as_bytes());
        } else {
            out.push(b);
        }
    }
}
