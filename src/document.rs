//! PDF document: open lifecycle, object cache, and lazy resolution
//!
//! A [`Document`] owns the bytes of one PDF file, its cross-reference
//! table, and the object cache. Objects materialize lazily: handles start
//! as unresolved stubs and load from their xref-indicated location on first
//! access, memoizing in the cache so every later dereference is a lookup.
//! The cache's in-progress marker is what breaks reference cycles; any
//! design that tracked visited objects per call would miss cycles entered
//! through unrelated call sites.
//!
//! Tearing the document down swaps every cached value to the destroyed
//! marker, so handles that outlive the document fail loudly instead of
//! reading freed data.

use crate::crypt::StringDecrypter;
use crate::error::{Error, Result, Warning};
use crate::input::InputSource;
use crate::object::{Object, Value};
use crate::objgen::ObjGen;
use crate::parser::{ObjectParser, ParseMode, ParserLimits};
use crate::tokenizer::Tokenizer;
use crate::xref::{self, XrefEntry, XrefTable};
use crate::xref_stream::{self, FieldWidths};
use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

/// Options for [`Document::open`]
pub struct OpenOptions {
    /// Decryption capability for encrypted files; key derivation happens
    /// outside this crate
    pub decrypter: Option<Rc<dyn StringDecrypter>>,
    /// Password the caller collected; recorded for the decrypter's benefit
    pub password: Option<String>,
    /// Parser resource bounds
    pub limits: ParserLimits,
    /// Whether a damaged xref triggers brute-force reconstruction instead
    /// of failing the open
    pub attempt_recovery: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            decrypter: None,
            password: None,
            limits: ParserLimits::default(),
            attempt_recovery: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveState {
    /// Stub created, nothing loaded
    Stub,
    /// Resolution underway; seeing this again is a reference cycle
    InProgress,
    /// Final value stored in the slot
    Resolved,
}

struct CachedObject {
    object: Object,
    state: ResolveState,
}

/// Shared state behind a document; handles refer to it weakly
pub struct DocumentState {
    name: String,
    data: Bytes,
    version: RefCell<String>,
    xref: RefCell<XrefTable>,
    trailer: RefCell<Object>,
    cache: RefCell<HashMap<ObjGen, CachedObject>>,
    warnings: RefCell<Vec<Warning>>,
    limits: ParserLimits,
    decrypter: Option<Rc<dyn StringDecrypter>>,
    attempt_recovery: bool,
    reconstructing: Cell<bool>,
}

/// An open PDF file
pub struct Document {
    state: Rc<DocumentState>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.state.name)
            .finish_non_exhaustive()
    }
}

impl Document {
    /// Open a document from an input source
    pub fn open(mut input: Box<dyn InputSource>, options: OpenOptions) -> Result<Document> {
        let name = input.name().to_string();
        let data = input.read_all()?;
        Self::open_internal(name, data, options)
    }

    /// Open a file from disk with default options
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Document> {
        let input = crate::input::FileInputSource::open(path)?;
        Self::open(Box::new(input), OpenOptions::default())
    }

    /// Open an in-memory buffer with default options
    pub fn open_bytes(name: &str, data: impl Into<Bytes>) -> Result<Document> {
        Self::open_internal(name.to_string(), data.into(), OpenOptions::default())
    }

    fn open_internal(name: String, data: Bytes, options: OpenOptions) -> Result<Document> {
        let OpenOptions {
            decrypter,
            password,
            limits,
            attempt_recovery,
        } = options;

        let version = match find_header(&data) {
            Some((pos, version)) => {
                if pos != 0 {
                    tracing::debug!(source = %name, pos, "PDF header not at start of file");
                }
                version
            }
            None => {
                return Err(Error::NotPdf(format!("{}: can't find PDF header", name)));
            }
        };

        let state = Rc::new(DocumentState {
            name,
            data,
            version: RefCell::new(version),
            xref: RefCell::new(XrefTable::new()),
            trailer: RefCell::new(Object::null()),
            cache: RefCell::new(HashMap::new()),
            warnings: RefCell::new(Vec::new()),
            limits,
            decrypter,
            attempt_recovery,
            reconstructing: Cell::new(false),
        });

        if let Err(e) = state.load_xref() {
            if e.is_fatal() || e.is_internal() || !state.attempt_recovery {
                return Err(e);
            }
            state.reconstruct(&e.to_string())?;
        } else if let Some(reason) = state.find_inconsistent_entry() {
            // trusted tables earn no trust when an offset fails its
            // self-consistency check
            if state.attempt_recovery {
                state.reconstruct(&reason)?;
            } else {
                return Err(Error::xref(reason));
            }
        }

        state.check_size_consistency();

        let doc = Document { state };
        if doc.trailer().dict_has("Encrypt")? && doc.state.decrypter.is_none() {
            let detail = if password.is_some() {
                "a password alone is not enough; key derivation requires a decrypter capability"
            } else {
                "no decrypter was supplied"
            };
            return Err(Error::Password(format!(
                "{}: file is encrypted and {}",
                doc.state.name, detail
            )));
        }
        Ok(doc)
    }

    /// Header version, e.g. "1.7"
    pub fn version(&self) -> String {
        self.state.version.borrow().clone()
    }

    /// The trailer dictionary
    pub fn trailer(&self) -> Object {
        self.state.trailer.borrow().clone()
    }

    /// Handle for the object `og`. The object is not loaded until first
    /// access. Requesting an identity the file does not define is a usage
    /// error.
    pub fn get_object(&self, og: ObjGen) -> Result<Object> {
        if !og.is_indirect() {
            return Err(Error::NotFound(og));
        }
        let known = self.state.xref.borrow().contains(og)
            || self.state.cache.borrow().contains_key(&og);
        if !known {
            return Err(Error::NotFound(og));
        }
        Ok(self.state.object_for(og))
    }

    /// Turn a direct object into a new indirect object owned by this
    /// document, returning a handle that aliases it
    pub fn make_indirect(&self, obj: Object) -> Result<Object> {
        if obj.is_indirect() {
            return Ok(obj);
        }
        let max_cached = self
            .state
            .cache
            .borrow()
            .keys()
            .map(|og| og.id)
            .max()
            .unwrap_or(0);
        let next = ObjGen::new(self.state.xref.borrow().max_id().max(max_cached) + 1, 0);
        obj.set_og(next);
        self.state.cache.borrow_mut().insert(
            next,
            CachedObject {
                object: obj.clone(),
                state: ResolveState::Resolved,
            },
        );
        Ok(obj)
    }

    /// New indirect object holding the reserved placeholder, for building
    /// groups of objects that refer to each other before any of them is
    /// complete. Accessing it before [`replace_reserved`] is an error.
    ///
    /// [`replace_reserved`]: Self::replace_reserved
    pub fn make_reserved(&self) -> Result<Object> {
        self.make_indirect(Object::from_value(Value::Reserved))
    }

    /// Fill a reserved object with the content of `replacement`; every
    /// handle aliasing the reservation observes the real value
    pub fn replace_reserved(&self, reserved: &Object, replacement: &Object) -> Result<()> {
        let current = reserved.raw_value();
        if !matches!(current, Value::Reserved) {
            return Err(Error::TypeMismatch {
                expected: "reserved",
                actual: current.type_name(),
            });
        }
        replacement.resolve()?;
        reserved.set_value(replacement.raw_value());
        Ok(())
    }

    /// Handles for every object the xref table knows about, plus objects
    /// added with [`make_indirect`](Self::make_indirect), in id order
    pub fn all_objects(&self) -> Vec<Object> {
        let mut ogs = self.state.xref.borrow().populated_objects();
        {
            let xref = self.state.xref.borrow();
            let cache = self.state.cache.borrow();
            for og in cache.keys() {
                if !xref.contains(*og) {
                    ogs.push(*og);
                }
            }
        }
        ogs.sort();
        ogs.dedup();
        ogs.into_iter()
            .map(|og| self.state.object_for(og))
            .collect()
    }

    /// Parse an object from a buffer in this document's context, so
    /// indirect references resolve against this file. The buffer is not
    /// part of the file, so dictionaries never promote to streams here.
    pub fn parse(&self, data: &[u8], description: &str) -> Result<(Object, bool)> {
        let mut tok = Tokenizer::new(data);
        let mut parser = ObjectParser::new(
            &mut tok,
            data,
            description,
            &self.state.limits,
            Some(Rc::clone(&self.state)),
            ObjGen::DIRECT,
            ParseMode::Object,
            false,
            true,
        );
        parser.parse_one()
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> Vec<Warning> {
        self.state.warnings.borrow().clone()
    }

    pub fn has_warnings(&self) -> bool {
        !self.state.warnings.borrow().is_empty()
    }

    /// True when the xref table had to be rebuilt by the recovery scan
    pub fn was_reconstructed(&self) -> bool {
        self.state.xref.borrow().is_reconstructed()
    }

    pub(crate) fn state(&self) -> &Rc<DocumentState> {
        &self.state
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        // Swap every live slot to the destroyed marker; retained handles
        // must fail, not dangle. Dropping the old container values here
        // also breaks any handle cycles the object graph formed (a page's
        // /Parent pointing back at its page tree, mutual references built
        // through reservations), so the slots themselves are freed.
        for cached in self.state.cache.borrow().values() {
            cached.object.destroy();
        }
        self.state.trailer.borrow().destroy();
    }
}

impl DocumentState {
    pub(crate) fn warn(&self, warning: Warning) {
        tracing::warn!(source = %warning.source, offset = warning.offset, "{}", warning.message);
        self.warnings.borrow_mut().push(warning);
    }

    fn warn_at(&self, offset: u64, message: String) {
        self.warn(Warning::new(&self.name, offset, message));
    }

    pub(crate) fn decrypter(&self) -> Option<Rc<dyn StringDecrypter>> {
        self.decrypter.clone()
    }

    pub(crate) fn doc_name(&self) -> &str {
        &self.name
    }

    pub(crate) fn xref_entry(&self, og: ObjGen) -> Option<XrefEntry> {
        self.xref.borrow().get(og)
    }

    /// Copy a byte span out of the file, for stream payload fetches
    pub(crate) fn read_span(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .map_err(|_| Error::parse("stream offset out of range"))?;
        let end = start
            .checked_add(usize::try_from(length).map_err(|_| Error::parse("stream length out of range"))?)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| {
                Error::parse(format!(
                    "stream data at offset {} extends beyond end of file",
                    offset
                ))
            })?;
        Ok(self.data[start..end].to_vec())
    }

    /// Shared handle for `og`, creating an unresolved stub on first sight
    /// so that every reference to one object aliases one slot
    pub(crate) fn object_for(self: &Rc<Self>, og: ObjGen) -> Object {
        let mut cache = self.cache.borrow_mut();
        if let Some(cached) = cache.get(&og) {
            return cached.object.clone();
        }
        let object = Object::unresolved(og, Rc::downgrade(self));
        cache.insert(
            og,
            CachedObject {
                object: object.clone(),
                state: ResolveState::Stub,
            },
        );
        object
    }

    fn set_state(&self, og: ObjGen, state: ResolveState) {
        if let Some(cached) = self.cache.borrow_mut().get_mut(&og) {
            cached.state = state;
        }
    }

    /// Resolve `og`, loading and caching its value.
    ///
    /// The protocol is mark-in-progress, load, store: if the in-progress
    /// marker is already present this call is part of a reference cycle and
    /// yields null with a warning instead of recursing forever.
    pub(crate) fn resolve_og(self: &Rc<Self>, og: ObjGen) -> Result<()> {
        enum Hit {
            Resolved,
            InProgress(Object),
            Pending(Option<Object>),
        }
        let hit = {
            let cache = self.cache.borrow();
            match cache.get(&og) {
                Some(cached) if cached.state == ResolveState::Resolved => Hit::Resolved,
                Some(cached) if cached.state == ResolveState::InProgress => {
                    Hit::InProgress(cached.object.clone())
                }
                Some(cached) => Hit::Pending(Some(cached.object.clone())),
                None => Hit::Pending(None),
            }
        };

        let handle = match hit {
            Hit::Resolved => return Ok(()),
            Hit::InProgress(handle) => {
                self.warn_at(
                    0,
                    format!("loop detected resolving object {}; treating as null", og),
                );
                handle.set_value(Value::Null);
                return Ok(());
            }
            Hit::Pending(Some(handle)) => handle,
            Hit::Pending(None) => self.object_for(og),
        };

        self.set_state(og, ResolveState::InProgress);
        let value = match self.load_object_value(og) {
            Ok(value) => value,
            Err(e) if e.is_internal() || e.is_fatal() => {
                self.set_state(og, ResolveState::Stub);
                return Err(e);
            }
            Err(e) => {
                // damage degrades the one object to null
                self.warn_at(0, format!("error resolving object {}: {}", og, e));
                Value::Null
            }
        };
        handle.set_value(value);
        self.set_state(og, ResolveState::Resolved);
        Ok(())
    }

    fn load_object_value(self: &Rc<Self>, og: ObjGen) -> Result<Value> {
        let entry = self.xref.borrow().get(og);
        match entry {
            None => {
                self.warn_at(
                    0,
                    format!("object {} not found in file; treating as null", og),
                );
                Ok(Value::Null)
            }
            Some(XrefEntry::Free) => Ok(Value::Null),
            Some(XrefEntry::Uncompressed { offset }) => {
                let (_, obj) = self.read_object_at_offset(offset, Some(og), true)?;
                self.settled_value(&obj, og)
            }
            Some(XrefEntry::Compressed { stream, .. }) => {
                self.resolve_objects_in_stream(stream)?;
                let resolved = {
                    let cache = self.cache.borrow();
                    cache
                        .get(&og)
                        .filter(|c| c.state == ResolveState::Resolved)
                        .map(|c| c.object.raw_value())
                };
                match resolved {
                    Some(value) => Ok(value),
                    None => {
                        self.warn_at(
                            0,
                            format!(
                                "object {} not found in object stream {}; treating as null",
                                og, stream
                            ),
                        );
                        Ok(Value::Null)
                    }
                }
            }
        }
    }

    /// An object whose entire body is a reference settles to its target's
    /// value; a reference straight back to itself settles to null
    fn settled_value(self: &Rc<Self>, obj: &Object, og: ObjGen) -> Result<Value> {
        let target = obj.og();
        if target.is_indirect() && target != og {
            obj.resolve()?;
        }
        let value = obj.raw_value();
        if matches!(value, Value::Unresolved(_)) {
            self.warn_at(
                0,
                format!("object {} is a reference to itself; treating as null", og),
            );
            return Ok(Value::Null);
        }
        Ok(value)
    }

    /// Read `<id> <gen> obj ... endobj` at a byte offset. On a header that
    /// fails to parse, reconstruct the xref once and retry at the entry's
    /// new location.
    fn read_object_at_offset(
        self: &Rc<Self>,
        offset: u64,
        expect: Option<ObjGen>,
        allow_retry: bool,
    ) -> Result<(ObjGen, Object)> {
        let data = &self.data;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let mut tok = Tokenizer::at(data, start);

        let id = tok.next_token().as_integer();
        let r#gen = tok.next_token().as_integer();
        let kw = tok.next_token();

        let header = match (id, r#gen, kw.is_word("obj")) {
            (Some(id), Some(r#gen), true) => {
                match (i32::try_from(id), i32::try_from(r#gen)) {
                    (Ok(id), Ok(r#gen)) if id >= 1 && r#gen >= 0 => Some(ObjGen::new(id, r#gen)),
                    _ => None,
                }
            }
            _ => None,
        };

        let actual = match header {
            Some(actual) => actual,
            None => {
                if allow_retry && expect.is_some() && self.attempt_recovery {
                    let expect = expect.unwrap_or_default();
                    self.reconstruct(&format!(
                        "expected {} obj at offset {}",
                        expect, offset
                    ))?;
                    if let Some(XrefEntry::Uncompressed { offset: new_offset }) =
                        self.xref.borrow().get(expect)
                    {
                        return self.read_object_at_offset(new_offset, None, false);
                    }
                }
                return Err(Error::parse(format!(
                    "expected n n obj at offset {}",
                    offset
                )));
            }
        };

        if let Some(expected) = expect {
            if actual != expected {
                // trust the requested identity over the header
                self.warn_at(
                    offset,
                    format!("expected object {}, found {}; using requested identity", expected, actual),
                );
            }
        }

        let mut parser = ObjectParser::new(
            &mut tok,
            data,
            &self.name,
            &self.limits,
            Some(Rc::clone(self)),
            actual,
            ParseMode::Object,
            self.xref.borrow().is_reconstructed(),
            false,
        );
        let (obj, empty) = parser.parse_one()?;
        if empty {
            self.warn_at(offset, format!("object {} is empty; treating as null", actual));
        }

        let end = tok.next_token();
        if !end.is_word("endobj") {
            self.warn_at(end.offset as u64, "expected endobj".to_string());
        }

        Ok((expect.unwrap_or(actual), obj))
    }

    /// Decode an object stream and cache every object it packs; decoding
    /// is one pass, so all members are populated together
    fn resolve_objects_in_stream(self: &Rc<Self>, stream_num: i32) -> Result<()> {
        let container_og = ObjGen::new(stream_num, 0);

        // object streams may not live inside object streams
        if let Some(XrefEntry::Compressed { .. }) = self.xref.borrow().get(container_og) {
            return Err(Error::parse(format!(
                "object stream {} is itself compressed; object streams cannot nest",
                stream_num
            )));
        }

        let container = self.object_for(container_og);
        container.resolve()?;
        if !container.is_stream()? {
            return Err(Error::parse(format!(
                "supposed object stream {} is not a stream",
                stream_num
            )));
        }
        let type_ok = container
            .dict_get("Type")?
            .as_name()
            .map(|n| n.as_str() == "ObjStm")
            .unwrap_or(false);
        if !type_ok {
            return Err(Error::parse(format!(
                "supposed object stream {} has wrong type",
                stream_num
            )));
        }

        let n = container.dict_get("N")?.as_int()?;
        let first = usize::try_from(container.dict_get("First")?.as_int()?)
            .map_err(|_| Error::parse("object stream /First is negative"))?;
        let payload = container.stream_data()?;
        let description = format!("object stream {}", stream_num);

        // header: n pairs of (object id, offset relative to /First)
        let mut tok = Tokenizer::new(&payload);
        let mut offsets: Vec<(i32, usize)> = Vec::new();
        for _ in 0..n {
            let id = tok.next_token().as_integer();
            let off = tok.next_token().as_integer();
            let (Some(id), Some(off)) = (id, off) else {
                return Err(Error::parse(format!(
                    "expected integer in object stream header of stream {}",
                    stream_num
                )));
            };
            let (Ok(id), Ok(off)) = (i32::try_from(id), usize::try_from(off)) else {
                return Err(Error::parse(format!(
                    "object stream {} header value out of range",
                    stream_num
                )));
            };
            offsets.push((id, first.saturating_add(off)));
        }

        for (id, obj_offset) in offsets {
            let og = ObjGen::new(id, 0);

            // an incremental update may have superseded this member; only
            // cache members this stream is authoritative for
            match self.xref.borrow().get(og) {
                Some(XrefEntry::Compressed { stream, .. }) if stream == stream_num => {}
                _ => continue,
            }
            let already_resolved = self
                .cache
                .borrow()
                .get(&og)
                .map(|c| c.state == ResolveState::Resolved)
                .unwrap_or(false);
            if already_resolved {
                continue;
            }

            let mut obj_tok = Tokenizer::at(&payload, obj_offset.min(payload.len()));
            let mut parser = ObjectParser::new(
                &mut obj_tok,
                &payload,
                &description,
                &self.limits,
                Some(Rc::clone(self)),
                og,
                ParseMode::Object,
                false,
                true,
            );
            let value = match parser.parse_one() {
                Ok((obj, false)) => self.settled_value(&obj, og)?,
                Ok((_, true)) => {
                    self.warn_at(
                        obj_offset as u64,
                        format!("object {} in object stream {} is empty", og, stream_num),
                    );
                    Value::Null
                }
                Err(e) if !e.is_internal() && !e.is_fatal() => {
                    self.warn_at(
                        obj_offset as u64,
                        format!("error parsing object {} in object stream {}: {}", og, stream_num, e),
                    );
                    Value::Null
                }
                Err(e) => return Err(e),
            };

            let handle = self.object_for(og);
            handle.set_value(value);
            self.set_state(og, ResolveState::Resolved);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Xref loading
    // ------------------------------------------------------------------

    fn load_xref(self: &Rc<Self>) -> Result<()> {
        let start = xref::find_startxref(&self.data)?;
        let mut next = Some(start);
        let mut visited = std::collections::HashSet::new();

        while let Some(offset) = next {
            if !visited.insert(offset) {
                return Err(Error::xref("circular /Prev chain in xref sections"));
            }
            next = self.load_xref_section(offset)?;
        }

        self.xref.borrow_mut().finalize();
        if self.trailer.borrow().is_null()? {
            return Err(Error::xref("no trailer dictionary found"));
        }
        Ok(())
    }

    /// Load one xref section (classic or stream) and return its /Prev
    fn load_xref_section(self: &Rc<Self>, offset: u64) -> Result<Option<u64>> {
        let pos = usize::try_from(offset)
            .ok()
            .filter(|&p| p < self.data.len())
            .ok_or_else(|| Error::xref(format!("xref offset {} out of bounds", offset)))?;

        let mut probe = Tokenizer::at(&self.data, pos);
        if probe.peek_token().is_word("xref") {
            self.load_classic_section(pos)
        } else {
            self.load_xref_stream(offset)
        }
    }

    fn load_classic_section(self: &Rc<Self>, pos: usize) -> Result<Option<u64>> {
        tracing::debug!(source = %self.name, offset = pos, "reading classic xref section");
        let section = xref::parse_classic_section(&self.data, pos)?;

        // free rows wait until the hybrid stream, if any, has been read
        let mut deferred_free = Vec::new();
        {
            let mut table = self.xref.borrow_mut();
            for entry in &section.entries {
                if entry.in_use {
                    table.insert_if_absent(
                        ObjGen::new(entry.id, entry.r#gen),
                        XrefEntry::Uncompressed {
                            offset: entry.offset,
                        },
                    );
                } else {
                    deferred_free.push(ObjGen::new(entry.id, entry.r#gen));
                }
            }
        }

        let (trailer, _) = self.parse_at(section.trailer_offset)?;
        if !trailer.is_dictionary()? {
            return Err(Error::xref("expected trailer dictionary"));
        }
        self.adopt_trailer(&trailer)?;

        // hybrid file: the cross-reference stream's entries take precedence
        // over this section's free rows, so read it first
        let xref_stm = trailer.dict_get("XRefStm")?;
        if !xref_stm.is_null()? {
            let stm_offset = u64::try_from(xref_stm.as_int()?)
                .map_err(|_| Error::xref("invalid /XRefStm"))?;
            self.load_xref_stream(stm_offset)?;
        }

        {
            let mut table = self.xref.borrow_mut();
            for og in deferred_free {
                table.insert_if_absent(og, XrefEntry::Free);
            }
        }

        self.prev_of(&trailer)
    }

    fn load_xref_stream(self: &Rc<Self>, offset: u64) -> Result<Option<u64>> {
        tracing::debug!(source = %self.name, offset, "reading cross-reference stream");
        let (_, obj) = self.read_object_at_offset(offset, None, false)?;
        if !obj.is_stream()? {
            return Err(Error::xref(format!(
                "object at offset {} is not a cross-reference stream",
                offset
            )));
        }

        let w = obj.dict_get("W")?;
        if !w.is_array()? || w.array_len()? < 3 {
            return Err(Error::xref("cross-reference stream lacks a usable /W"));
        }
        let widths = FieldWidths::new(
            usize::try_from(w.array_get(0)?.as_int()?).map_err(|_| Error::xref("negative /W"))?,
            usize::try_from(w.array_get(1)?.as_int()?).map_err(|_| Error::xref("negative /W"))?,
            usize::try_from(w.array_get(2)?.as_int()?).map_err(|_| Error::xref("negative /W"))?,
        )?;

        let size = obj.dict_get("Size")?.as_int()?;
        let index_obj = obj.dict_get("Index")?;
        let mut index: Vec<(i32, i32)> = Vec::new();
        if index_obj.is_null()? {
            index.push((0, i32::try_from(size).map_err(|_| Error::xref("bad /Size"))?));
        } else {
            let items = index_obj.as_array()?;
            if items.len() % 2 != 0 {
                return Err(Error::xref("/Index has an odd number of elements"));
            }
            for pair in items.chunks(2) {
                index.push((pair[0].as_i32()?, pair[1].as_i32()?));
            }
        }

        let payload = obj.stream_data()?;
        let rows = xref_stream::decode_entries(&payload, widths, &index)?;

        {
            let mut table = self.xref.borrow_mut();
            for (id, row) in rows {
                match row.kind {
                    0 => table.insert_if_absent(
                        ObjGen::new(id, row.field3 as i32),
                        XrefEntry::Free,
                    ),
                    1 => table.insert_if_absent(
                        ObjGen::new(id, row.field3 as i32),
                        XrefEntry::Uncompressed { offset: row.field2 },
                    ),
                    2 => table.insert_if_absent(
                        ObjGen::new(id, 0),
                        XrefEntry::Compressed {
                            stream: i32::try_from(row.field2)
                                .map_err(|_| Error::xref("object stream number out of range"))?,
                            index: row.field3,
                        },
                    ),
                    other => {
                        return Err(Error::xref(format!(
                            "unknown xref stream entry type {}",
                            other
                        )));
                    }
                }
            }
        }

        let trailer = Object::dictionary(obj.as_dict()?);
        self.adopt_trailer(&trailer)?;
        self.prev_of(&trailer)
    }

    /// First trailer seen wins, matching newest-first load order
    fn adopt_trailer(&self, trailer: &Object) -> Result<()> {
        if self.trailer.borrow().is_null()? {
            if !trailer.dict_has("Size")? {
                return Err(Error::xref("trailer dictionary lacks /Size"));
            }
            *self.trailer.borrow_mut() = trailer.clone();
        }
        Ok(())
    }

    fn prev_of(&self, trailer: &Object) -> Result<Option<u64>> {
        let prev = trailer.dict_get("Prev")?;
        if prev.is_null()? {
            return Ok(None);
        }
        let value = prev
            .as_int()
            .map_err(|_| Error::xref("/Prev is not an integer"))?;
        u64::try_from(value)
            .map(Some)
            .map_err(|_| Error::xref("/Prev is negative"))
    }

    fn parse_at(self: &Rc<Self>, pos: usize) -> Result<(Object, bool)> {
        let mut tok = Tokenizer::at(&self.data, pos);
        let mut parser = ObjectParser::new(
            &mut tok,
            &self.data,
            &self.name,
            &self.limits,
            Some(Rc::clone(self)),
            ObjGen::DIRECT,
            ParseMode::Object,
            false,
            false,
        );
        parser.parse_one()
    }

    /// Self-consistency check: every uncompressed entry must point at the
    /// header of the object it claims to locate
    fn find_inconsistent_entry(&self) -> Option<String> {
        let table = self.xref.borrow();
        for og in table.populated_objects() {
            if let Some(XrefEntry::Uncompressed { offset }) = table.get(og) {
                if !xref::offset_points_at(&self.data, offset, og) {
                    return Some(format!(
                        "xref entry for object {} points at offset {} which is not its header",
                        og, offset
                    ));
                }
            }
        }
        None
    }

    fn check_size_consistency(&self) {
        let declared = self
            .trailer
            .borrow()
            .dict_get("Size")
            .and_then(|s| s.as_int());
        if let Ok(size) = declared {
            let max_id = self.xref.borrow().max_id() as i64;
            if size != max_id + 1 {
                self.warn_at(
                    0,
                    format!(
                        "reported number of objects ({}) inconsistent with actual number ({})",
                        size,
                        max_id + 1
                    ),
                );
            }
        }
    }

    /// Brute-force xref reconstruction: scan the whole file for object
    /// headers, last (and highest-generation) occurrence wins, and take
    /// the first parseable trailer dictionary
    pub(crate) fn reconstruct(self: &Rc<Self>, reason: &str) -> Result<()> {
        if self.reconstructing.get() {
            return Err(Error::xref(
                "cross-reference reconstruction entered recursively",
            ));
        }
        if self.xref.borrow().is_reconstructed() {
            return Err(Error::xref(format!(
                "file is damaged beyond reconstruction: {}",
                reason
            )));
        }
        self.reconstructing.set(true);
        let result = self.reconstruct_inner(reason);
        self.reconstructing.set(false);
        result
    }

    fn reconstruct_inner(self: &Rc<Self>, reason: &str) -> Result<()> {
        self.warn_at(
            0,
            format!(
                "file is damaged ({}); attempting to reconstruct cross-reference table",
                reason
            ),
        );

        {
            let mut table = self.xref.borrow_mut();
            table.clear();
            table.set_reconstructed();
            for found in xref::scan_object_headers(&self.data) {
                table.insert_overwrite(
                    found.og,
                    XrefEntry::Uncompressed {
                        offset: found.offset,
                    },
                );
            }
        }

        if self.trailer.borrow().is_null()? {
            for trailer_pos in xref::scan_trailers(&self.data) {
                if let Ok((obj, false)) = self.parse_at(trailer_pos) {
                    if obj.is_dictionary()? && obj.dict_has("Root")? {
                        *self.trailer.borrow_mut() = obj;
                        break;
                    }
                }
            }
        }

        if self.trailer.borrow().is_null()? {
            return Err(Error::NoTrailer(format!(
                "{}: unable to find trailer dictionary while recovering damaged file",
                self.name
            )));
        }
        Ok(())
    }
}

/// Locate `%PDF-x.y` within the first 1 KiB; returns (position, version)
fn find_header(data: &[u8]) -> Option<(usize, String)> {
    let window = 1024.min(data.len());
    let pos = data[..window].windows(5).position(|w| w == b"%PDF-")?;
    let rest = &data[pos + 5..];
    let end = rest
        .iter()
        .position(|&b| crate::tokenizer::is_whitespace(b))
        .unwrap_or(rest.len().min(8));
    let version = String::from_utf8_lossy(&rest[..end.min(8)]).into_owned();
    if version.is_empty() {
        return None;
    }
    Some((pos, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header() {
        let (pos, version) = find_header(b"%PDF-1.7\nrest").unwrap();
        assert_eq!(pos, 0);
        assert_eq!(version, "1.7");

        let (pos, _) = find_header(b"junk\n%PDF-1.4\n").unwrap();
        assert_eq!(pos, 5);

        assert!(find_header(b"not a pdf at all").is_none());
    }

    #[test]
    fn test_open_rejects_non_pdf() {
        let err = Document::open_bytes("x", &b"this is just text, no header"[..]).unwrap_err();
        assert!(matches!(err, Error::NotPdf(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_get_object_unknown_is_usage_error() {
        let pdf = crate::test_pdf::minimal_pdf();
        let doc = Document::open_bytes("mini.pdf", pdf).unwrap();
        let err = doc.get_object(ObjGen::new(999, 0)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.is_usage());
    }

    #[test]
    fn test_length_cycle_breaks_with_warning() {
        let pdf = crate::test_pdf::pdf_with_length_cycle();
        let doc = Document::open_bytes("cycle.pdf", pdf).unwrap();
        let stream = doc.get_object(ObjGen::new(4, 0)).unwrap();
        // resolving the stream resolves /Length, which refers back to the
        // stream itself; the in-progress marker breaks the loop and the
        // payload length is recovered by scanning
        assert!(stream.is_stream().unwrap());
        assert_eq!(stream.stream_data().unwrap(), b"BT (cyclic) Tj ET");
        assert!(
            doc.warnings()
                .iter()
                .any(|w| w.message.contains("loop detected"))
        );
    }

    #[test]
    fn test_corrupt_offset_triggers_reconstruction() {
        let pdf = crate::test_pdf::minimal_pdf_with_corrupt_offset();
        let doc = Document::open_bytes("corrupt.pdf", pdf).unwrap();
        assert!(doc.was_reconstructed());
        assert_eq!(doc.warnings().len(), 1);
        let page = doc.get_object(ObjGen::new(3, 0)).unwrap();
        assert_eq!(
            page.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Page"
        );
    }

    #[test]
    fn test_reserved_objects_build_mutual_references() {
        use crate::object::Dict;

        let doc = Document::open_bytes("mini.pdf", crate::test_pdf::minimal_pdf()).unwrap();
        let a = doc.make_reserved().unwrap();
        let b = doc.make_reserved().unwrap();

        // touching a reservation before it is filled is a bug, not damage
        assert!(a.is_dictionary().unwrap_err().is_internal());

        let content_a = Object::dictionary(Dict::new());
        content_a.replace_key("Peer", b.clone()).unwrap();
        let content_b = Object::dictionary(Dict::new());
        content_b.replace_key("Peer", a.clone()).unwrap();

        doc.replace_reserved(&a, &content_a).unwrap();
        doc.replace_reserved(&b, &content_b).unwrap();

        // the cycle closes: a -> b -> a through shared slots
        let round = a.dict_get("Peer").unwrap().dict_get("Peer").unwrap();
        assert!(round.same_slot(&a));

        // filling the same reservation twice is rejected
        assert!(doc.replace_reserved(&a, &content_b).is_err());
    }

    #[test]
    fn test_make_indirect_assigns_fresh_id() {
        let doc = Document::open_bytes("mini.pdf", crate::test_pdf::minimal_pdf()).unwrap();
        let obj = Object::integer(99);
        let indirect = doc.make_indirect(obj).unwrap();
        assert!(indirect.is_indirect());
        assert!(indirect.og().id > 4);
        // the new object comes back through the normal lookup path
        let fetched = doc.get_object(indirect.og()).unwrap();
        assert!(fetched.same_slot(&indirect));
        assert!(doc.all_objects().iter().any(|o| o.og() == indirect.og()));
    }
}
