//! PDF object parser
//!
//! A state machine over a stack of frames, one per open array or
//! dictionary, driven by the flat token stream. The grammar wrinkle is the
//! integer run: `<int> <int> R` is an indirect reference and `<int> <int>
//! obj` an object header, so up to two pending integers are buffered until
//! a disambiguating token arrives.
//!
//! Malformed input never panics and rarely aborts: damage degrades to
//! recorded warnings and null substitutes, bounded by the limits in
//! [`ParserLimits`] so adversarial input cannot run away with the stack or
//! the heap.

use crate::document::DocumentState;
use crate::error::{Error, Result, Warning};
use crate::object::{Dict, Name, Object, PdfString, Value};
use crate::objgen::ObjGen;
use crate::stream::{StreamSource, StreamValue};
use crate::tokenizer::{TokenKind, Tokenizer};
use bytes::Bytes;
use smallvec::SmallVec;
use std::rc::Rc;

/// Resource bounds applied while parsing
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParserLimits {
    /// Consecutive invalid tokens tolerated before giving up on an object
    pub max_bad_tokens: u32,
    /// Total recoverable errors tolerated per object; None means unlimited
    pub max_errors: Option<u32>,
    /// Maximum array/dictionary nesting depth
    pub max_nesting: usize,
    /// Maximum elements per container in normal parsing
    pub max_container_len: usize,
    /// Stricter container bound while recovering a damaged file, which is
    /// far more likely to be fed garbage that looks like a huge container
    pub recovery_container_len: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_bad_tokens: 15,
            max_errors: None,
            max_nesting: 500,
            max_container_len: 5_000_000,
            recovery_container_len: 50_000,
        }
    }
}

/// What grammar the parser is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// File body objects: dictionaries may become streams, references are
    /// recognized
    Object,
    /// Content streams: unknown words are operators, `BI`/`ID`/`EI`
    /// sequences become inline images, no stream promotion
    Content,
}

enum Frame {
    Array {
        items: Vec<Object>,
    },
    Dict {
        entries: Dict,
        pending_key: Option<Name>,
    },
}

pub(crate) struct ObjectParser<'a, 'b> {
    tok: &'b mut Tokenizer<'a>,
    data: &'a [u8],
    description: &'b str,
    limits: &'b ParserLimits,
    doc: Option<Rc<DocumentState>>,
    /// Identity of the containing indirect object, used for decryption
    og: ObjGen,
    mode: ParseMode,
    recovery: bool,
    in_object_stream: bool,
    bad_count: u32,
    error_count: u32,
}

impl<'a, 'b> ObjectParser<'a, 'b> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tok: &'b mut Tokenizer<'a>,
        data: &'a [u8],
        description: &'b str,
        limits: &'b ParserLimits,
        doc: Option<Rc<DocumentState>>,
        og: ObjGen,
        mode: ParseMode,
        recovery: bool,
        in_object_stream: bool,
    ) -> Self {
        Self {
            tok,
            data,
            description,
            limits,
            doc,
            og,
            mode,
            recovery,
            in_object_stream,
            bad_count: 0,
            error_count: 0,
        }
    }

    fn warn(&self, offset: usize, message: String) {
        tracing::warn!(source = self.description, offset, "{}", message);
        if let Some(doc) = &self.doc {
            doc.warn(Warning::new(self.description, offset as u64, message));
        }
    }

    fn count_error(&mut self, offset: usize, message: String) -> Result<()> {
        self.warn(offset, message);
        self.error_count += 1;
        if let Some(max) = self.limits.max_errors {
            if self.error_count > max {
                return Err(Error::limit(format!(
                    "too many errors while parsing {}; giving up",
                    self.description
                )));
            }
        }
        Ok(())
    }

    fn count_bad_token(&mut self, offset: usize, message: String) -> Result<()> {
        self.bad_count += 1;
        if self.bad_count > self.limits.max_bad_tokens {
            return Err(Error::limit(format!(
                "too many consecutive bad tokens at offset {} in {}; giving up",
                offset, self.description
            )));
        }
        self.count_error(offset, message)
    }

    fn container_cap(&self) -> usize {
        if self.recovery {
            self.limits.recovery_container_len
        } else {
            self.limits.max_container_len
        }
    }

    /// Parse one object. The bool is true when the input held nothing to
    /// parse (only whitespace, comments, or an object boundary keyword).
    pub(crate) fn parse_one(&mut self) -> Result<(Object, bool)> {
        let mut stack: SmallVec<[Frame; 16]> = SmallVec::new();
        // pending integers with their offsets, for the `int int R` lookahead
        let mut ints: SmallVec<[(i64, usize); 2]> = SmallVec::new();

        loop {
            let token = self.tok.next_token();

            // Integers buffer until a disambiguating token shows up
            if let TokenKind::Integer(v) = &token.kind {
                let v = *v;
                self.bad_count = 0;
                if ints.len() == 2 {
                    let (old, off) = ints.remove(0);
                    if let Some(result) =
                        self.deliver(&mut stack, Object::integer(old), off)?
                    {
                        // the next tokens belong to whatever follows
                        self.tok.seek(ints[0].1);
                        return Ok((result, false));
                    }
                }
                ints.push((v, token.offset));
                continue;
            }

            // `int int R` resolves the buffered pair into a reference
            if token.is_word("R") && ints.len() == 2 {
                self.bad_count = 0;
                let id = ints[0].0;
                let r#gen = ints[1].0;
                let offset = ints[0].1;
                ints.clear();
                let obj = self.make_reference(id, r#gen, offset)?;
                if let Some(result) = self.deliver(&mut stack, obj, offset)? {
                    return Ok((result, false));
                }
                continue;
            }

            // any other token flushes pending integers first
            if !ints.is_empty() {
                if stack.is_empty() {
                    // the first integer completes the object; everything
                    // after it is unconsumed input
                    let (v, _) = ints[0];
                    let resume = if ints.len() > 1 { ints[1].1 } else { token.offset };
                    self.tok.seek(resume);
                    return Ok((Object::integer(v), false));
                }
                for (v, off) in ints.drain(..) {
                    // inside a container both integers are plain values
                    if self.deliver(&mut stack, Object::integer(v), off)?.is_some() {
                        return Err(Error::internal("integer flush closed the object"));
                    }
                }
            }

            match token.kind {
                TokenKind::Eof => {
                    if stack.is_empty() {
                        return Ok((Object::null(), true));
                    }
                    return Err(Error::parse(format!(
                        "unexpected EOF inside container in {}",
                        self.description
                    )));
                }

                TokenKind::Null => {
                    self.bad_count = 0;
                    if let Some(r) = self.deliver(&mut stack, Object::null(), token.offset)? {
                        return Ok((r, false));
                    }
                }
                TokenKind::Boolean(b) => {
                    self.bad_count = 0;
                    if let Some(r) =
                        self.deliver(&mut stack, Object::boolean(b), token.offset)?
                    {
                        return Ok((r, false));
                    }
                }
                TokenKind::Real(text) => {
                    self.bad_count = 0;
                    if let Some(r) = self.deliver(&mut stack, Object::real(text), token.offset)? {
                        return Ok((r, false));
                    }
                }
                TokenKind::String(bytes) => {
                    self.bad_count = 0;
                    let obj = self.make_string(bytes)?;
                    if let Some(r) = self.deliver(&mut stack, obj, token.offset)? {
                        return Ok((r, false));
                    }
                }
                TokenKind::Name(name) => {
                    self.bad_count = 0;
                    let obj = Object::from_value(Value::Name(Name::from_string(name)));
                    if let Some(r) = self.deliver(&mut stack, obj, token.offset)? {
                        return Ok((r, false));
                    }
                }

                TokenKind::ArrayOpen => {
                    self.bad_count = 0;
                    if stack.len() >= self.limits.max_nesting {
                        return Err(Error::limit(format!(
                            "container nesting exceeds {} at offset {}",
                            self.limits.max_nesting, token.offset
                        )));
                    }
                    stack.push(Frame::Array { items: Vec::new() });
                }
                TokenKind::DictOpen => {
                    self.bad_count = 0;
                    if stack.len() >= self.limits.max_nesting {
                        return Err(Error::limit(format!(
                            "container nesting exceeds {} at offset {}",
                            self.limits.max_nesting, token.offset
                        )));
                    }
                    stack.push(Frame::Dict {
                        entries: Dict::new(),
                        pending_key: None,
                    });
                }

                TokenKind::ArrayClose => match stack.pop() {
                    Some(Frame::Array { items, .. }) => {
                        self.bad_count = 0;
                        let obj = Object::array(items);
                        if let Some(r) = self.deliver(&mut stack, obj, token.offset)? {
                            return Ok((r, false));
                        }
                    }
                    Some(frame) => {
                        stack.push(frame);
                        self.count_bad_token(
                            token.offset,
                            "unexpected ] while a dictionary is open".into(),
                        )?;
                    }
                    None => {
                        self.count_bad_token(token.offset, "unexpected ]".into())?;
                    }
                },

                TokenKind::DictClose => match stack.pop() {
                    Some(Frame::Dict {
                        mut entries,
                        pending_key,
                        ..
                    }) => {
                        self.bad_count = 0;
                        if let Some(key) = pending_key {
                            // trailing unmatched key gets a synthesized null
                            self.count_error(
                                token.offset,
                                format!("dictionary key /{} has no value; supplying null", key.as_str()),
                            )?;
                            entries.insert(key, Object::null());
                        }
                        let obj = if stack.is_empty() && self.mode == ParseMode::Object {
                            self.maybe_promote_stream(entries)?
                        } else {
                            Object::dictionary(entries)
                        };
                        if let Some(r) = self.deliver(&mut stack, obj, token.offset)? {
                            return Ok((r, false));
                        }
                    }
                    Some(frame) => {
                        stack.push(frame);
                        self.count_bad_token(
                            token.offset,
                            "unexpected >> while an array is open".into(),
                        )?;
                    }
                    None => {
                        self.count_bad_token(token.offset, "unexpected >>".into())?;
                    }
                },

                TokenKind::Word(word) => match self.mode {
                    ParseMode::Content => {
                        self.bad_count = 0;
                        let obj = if word == "BI" {
                            self.parse_inline_image(token.offset)?
                        } else {
                            Object::operator(word)
                        };
                        if let Some(r) = self.deliver(&mut stack, obj, token.offset)? {
                            return Ok((r, false));
                        }
                    }
                    ParseMode::Object => {
                        if stack.is_empty() && is_boundary_word(&word) {
                            // object boundary before any content: nothing here
                            self.tok.seek(token.offset);
                            return Ok((Object::null(), true));
                        }
                        self.count_bad_token(
                            token.offset,
                            format!("unknown token '{}' while reading object", word),
                        )?;
                    }
                },

                TokenKind::Bad(text, reason) => {
                    self.count_bad_token(
                        token.offset,
                        format!("invalid token '{}': {}", text, reason),
                    )?;
                }

                TokenKind::Integer(_) => {
                    return Err(Error::internal("integer token escaped the lookahead buffer"));
                }
            }
        }
    }

    /// Parse a content stream into its operand/operator sequence
    pub(crate) fn parse_content_objects(&mut self) -> Result<Vec<Object>> {
        let mut out = Vec::new();
        loop {
            if self.tok.peek_token().kind == TokenKind::Eof {
                return Ok(out);
            }
            let (obj, empty) = self.parse_one()?;
            if empty {
                return Ok(out);
            }
            out.push(obj);
        }
    }

    fn make_string(&self, bytes: Vec<u8>) -> Result<Object> {
        let bytes = match &self.doc {
            Some(doc) if !self.in_object_stream && self.og.is_indirect() => {
                match doc.decrypter() {
                    Some(d) => d.decrypt_string(&bytes, self.og)?,
                    None => bytes,
                }
            }
            _ => bytes,
        };
        Ok(Object::from_value(Value::String(PdfString::new(bytes))))
    }

    fn make_reference(&mut self, id: i64, r#gen: i64, offset: usize) -> Result<Object> {
        if self.mode == ParseMode::Content {
            // content streams have no indirect references
            return Ok(Object::operator("R"));
        }
        let (Ok(id), Ok(r#gen)) = (i32::try_from(id), i32::try_from(r#gen)) else {
            self.count_error(offset, format!("reference {} {} R out of range", id, r#gen))?;
            return Ok(Object::null());
        };
        if id < 1 || r#gen < 0 {
            self.count_error(offset, format!("invalid reference {} {} R", id, r#gen))?;
            return Ok(Object::null());
        }
        match &self.doc {
            Some(doc) => Ok(doc.object_for(ObjGen::new(id, r#gen))),
            None => Err(Error::parse(format!(
                "indirect reference {} {} R has no document context in {}",
                id, r#gen, self.description
            ))),
        }
    }

    fn deliver(
        &mut self,
        stack: &mut SmallVec<[Frame; 16]>,
        obj: Object,
        offset: usize,
    ) -> Result<Option<Object>> {
        match stack.last_mut() {
            None => Ok(Some(obj)),
            Some(Frame::Array { items, .. }) => {
                if items.len() >= self.container_cap() {
                    return Err(Error::limit(format!(
                        "array at offset {} exceeds {} elements",
                        offset,
                        self.container_cap()
                    )));
                }
                items.push(obj);
                Ok(None)
            }
            Some(Frame::Dict {
                entries,
                pending_key,
                ..
            }) => {
                match pending_key.take() {
                    None => {
                        // expecting a key
                        match obj.raw_value() {
                            Value::Name(n) => *pending_key = Some(n),
                            other => {
                                let type_name = other.type_name().to_string();
                                self.count_error(
                                    offset,
                                    format!(
                                        "dictionary key is a {}, not a name; discarding",
                                        type_name
                                    ),
                                )?;
                            }
                        }
                    }
                    Some(key) => {
                        if entries.len() >= self.container_cap() {
                            return Err(Error::limit(format!(
                                "dictionary at offset {} exceeds {} entries",
                                offset,
                                self.container_cap()
                            )));
                        }
                        if entries.contains_key(&key) {
                            // last write wins, with a record of the clash
                            self.count_error(
                                offset,
                                format!("duplicate dictionary key /{}", key.as_str()),
                            )?;
                        }
                        entries.insert(key, obj);
                    }
                }
                Ok(None)
            }
        }
    }

    /// A dictionary followed by a `stream` keyword becomes a stream whose
    /// payload starts right after the keyword's end-of-line
    fn maybe_promote_stream(&mut self, entries: Dict) -> Result<Object> {
        let doc = match &self.doc {
            Some(doc) if !self.in_object_stream => Rc::clone(doc),
            _ => return Ok(Object::dictionary(entries)),
        };
        let saved = self.tok.pos();
        let token = self.tok.next_token();
        if !token.is_word("stream") {
            self.tok.seek(saved);
            return Ok(Object::dictionary(entries));
        }

        self.tok.skip_stream_eol();
        let stream_offset = self.tok.pos();
        let dict = Object::dictionary(entries.clone());

        // The declared /Length may be absent, indirect, or wrong; trust it
        // only if it lands on an endstream keyword
        let declared = self.declared_length(&dict);
        let length = match declared {
            Some(len) if self.length_is_consistent(stream_offset, len) => len,
            _ => {
                self.count_error(
                    stream_offset,
                    "stream length missing or inconsistent; recovering by scanning for endstream"
                        .into(),
                )?;
                self.recover_stream_length(stream_offset)?
            }
        };

        // position past the payload and the endstream keyword
        self.tok.seek(stream_offset + length);
        let token = self.tok.next_token();
        if !token.is_word("endstream") {
            self.count_error(token.offset, "expected endstream".into())?;
            self.tok.seek(token.offset);
        }

        Ok(Object::from_value(Value::Stream(StreamValue::new(
            entries,
            StreamSource::File {
                doc: Rc::downgrade(&doc),
                offset: stream_offset as u64,
                length: length as u64,
            },
        ))))
    }

    fn declared_length(&self, dict: &Object) -> Option<usize> {
        let length = dict.dict_get("Length").ok()?;
        length.resolve().ok()?;
        usize::try_from(length.as_int().ok()?).ok()
    }

    fn length_is_consistent(&mut self, stream_offset: usize, length: usize) -> bool {
        let end = stream_offset.checked_add(length);
        let Some(end) = end else { return false };
        if end > self.data.len() {
            return false;
        }
        let saved = self.tok.pos();
        self.tok.seek(end);
        let ok = self.tok.next_token().is_word("endstream");
        self.tok.seek(saved);
        ok
    }

    /// Scan forward for the matching endstream keyword and derive the
    /// payload length from its position
    fn recover_stream_length(&mut self, stream_offset: usize) -> Result<usize> {
        let needle = b"endstream";
        let hay = &self.data[stream_offset.min(self.data.len())..];
        let found = hay
            .windows(needle.len())
            .position(|w| w == needle)
            .ok_or_else(|| {
                Error::parse(format!(
                    "unable to find endstream while recovering stream length in {}",
                    self.description
                ))
            })?;
        let mut length = found;
        // the end-of-line before endstream is not payload
        if length >= 1 && hay[length - 1] == b'\n' {
            length -= 1;
        }
        if length >= 1 && hay[length - 1] == b'\r' {
            length -= 1;
        }
        Ok(length)
    }

    /// `BI` was consumed; read key/value pairs to `ID`, then the binary
    /// payload to `EI`
    fn parse_inline_image(&mut self, offset: usize) -> Result<Object> {
        loop {
            let token = self.tok.next_token();
            match token.kind {
                TokenKind::Word(w) if w == "ID" => break,
                TokenKind::Eof => {
                    return Err(Error::parse(format!(
                        "unterminated inline image at offset {} in {}",
                        offset, self.description
                    )));
                }
                _ => {}
            }
        }
        let data: Bytes = self.tok.read_inline_image_data();
        Ok(Object::from_value(Value::InlineImage(data)))
    }
}

fn is_boundary_word(word: &str) -> bool {
    matches!(
        word,
        "endobj" | "stream" | "endstream" | "obj" | "trailer" | "xref" | "startxref"
    )
}

/// Parse a single object from a buffer with no owning document
pub(crate) fn parse_standalone(data: &[u8], description: &str) -> Result<(Object, bool)> {
    let limits = ParserLimits::default();
    let mut tok = Tokenizer::new(data);
    let mut parser = ObjectParser::new(
        &mut tok,
        data,
        description,
        &limits,
        None,
        ObjGen::DIRECT,
        ParseMode::Object,
        false,
        false,
    );
    parser.parse_one()
}

/// Parse a content stream into its operand/operator sequence
pub fn parse_content(data: &[u8], description: &str, limits: &ParserLimits) -> Result<Vec<Object>> {
    let mut tok = Tokenizer::new(data);
    let mut parser = ObjectParser::new(
        &mut tok,
        data,
        description,
        limits,
        None,
        ObjGen::DIRECT,
        ParseMode::Content,
        false,
        false,
    );
    parser.parse_content_objects()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Object {
        let (obj, empty) = parse_standalone(data, "test").unwrap();
        assert!(!empty);
        obj
    }

    #[test]
    fn test_parse_scalars() {
        assert!(parse(b"null").is_null().unwrap());
        assert_eq!(parse(b"true").as_bool().unwrap(), true);
        assert_eq!(parse(b"42").as_int().unwrap(), 42);
        assert_eq!(parse(b"-1.50").as_real_text().unwrap(), "-1.50");
        assert_eq!(parse(b"/Name").as_name().unwrap().as_str(), "Name");
        assert_eq!(parse(b"(text)").as_string().unwrap().as_bytes(), b"text");
    }

    #[test]
    fn test_parse_array() {
        let obj = parse(b"[1 2.5 /X (s) [true]]");
        assert_eq!(obj.array_len().unwrap(), 5);
        assert_eq!(obj.array_get(0).unwrap().as_int().unwrap(), 1);
        assert_eq!(obj.array_get(4).unwrap().array_len().unwrap(), 1);
    }

    #[test]
    fn test_parse_dict() {
        let obj = parse(b"<< /Type /Catalog /Count 3 >>");
        assert!(obj.is_dictionary().unwrap());
        assert_eq!(
            obj.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Catalog"
        );
        assert_eq!(obj.dict_get("Count").unwrap().as_int().unwrap(), 3);
    }

    #[test]
    fn test_two_bare_integers_stay_integers() {
        // `3 0` followed by end-of-container: two separate integers
        let obj = parse(b"[3 0]");
        assert_eq!(obj.array_len().unwrap(), 2);
        assert_eq!(obj.array_get(0).unwrap().as_int().unwrap(), 3);
        assert_eq!(obj.array_get(1).unwrap().as_int().unwrap(), 0);
    }

    #[test]
    fn test_integer_run_longer_than_two() {
        let obj = parse(b"[1 2 3 4 5]");
        assert_eq!(obj.array_len().unwrap(), 5);
        for i in 0..5 {
            assert_eq!(obj.array_get(i).unwrap().as_int().unwrap(), i as i64 + 1);
        }
    }

    #[test]
    fn test_reference_without_document_is_error() {
        let err = parse_standalone(b"<< /Parent 3 0 R >>", "test").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_top_level_integer_leaves_rest_unconsumed() {
        let data = b"42 endobj";
        let mut tok = Tokenizer::new(data);
        let limits = ParserLimits::default();
        let mut p = ObjectParser::new(
            &mut tok,
            data,
            "test",
            &limits,
            None,
            ObjGen::DIRECT,
            ParseMode::Object,
            false,
            false,
        );
        let (obj, empty) = p.parse_one().unwrap();
        assert!(!empty);
        assert_eq!(obj.as_int().unwrap(), 42);
        assert!(tok.next_token().is_word("endobj"));
    }

    #[test]
    fn test_empty_input_reports_empty() {
        let (obj, empty) = parse_standalone(b"  % nothing here\n", "test").unwrap();
        assert!(empty);
        assert!(obj.is_null().unwrap());
    }

    #[test]
    fn test_boundary_word_reports_empty() {
        let (_, empty) = parse_standalone(b"endobj", "test").unwrap();
        assert!(empty);
    }

    #[test]
    fn test_trailing_key_gets_null() {
        let obj = parse(b"<< /Type /Page /Dangling >>");
        assert!(obj.dict_get("Dangling").unwrap().is_null().unwrap());
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let obj = parse(b"<< /K 1 /K 2 >>");
        assert_eq!(obj.dict_get("K").unwrap().as_int().unwrap(), 2);
    }

    #[test]
    fn test_non_name_key_discarded() {
        let obj = parse(b"<< 42 /K 1 >>");
        assert_eq!(obj.dict_get("K").unwrap().as_int().unwrap(), 1);
        assert_eq!(obj.dict_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_nesting_limit_is_hard_error() {
        let mut data = Vec::new();
        for _ in 0..600 {
            data.push(b'[');
        }
        let err = parse_standalone(&data, "test").unwrap_err();
        assert!(matches!(err, Error::Limit(_)));
    }

    #[test]
    fn test_bad_token_run_aborts() {
        let data = b"[ } } } } } } } } } } } } } } } } } } 1 ]";
        let err = parse_standalone(data, "test").unwrap_err();
        assert!(matches!(err, Error::Limit(_)));
    }

    #[test]
    fn test_good_tokens_reset_bad_run() {
        // 10 bad, a good value, 10 bad: never exceeds the consecutive cap
        let mut data: Vec<u8> = b"[ ".to_vec();
        for _ in 0..10 {
            data.extend_from_slice(b"} ");
        }
        data.extend_from_slice(b"7 ");
        for _ in 0..10 {
            data.extend_from_slice(b"} ");
        }
        data.extend_from_slice(b"]");
        let (obj, _) = parse_standalone(&data, "test").unwrap();
        assert_eq!(obj.array_len().unwrap(), 1);
    }

    #[test]
    fn test_total_error_cap() {
        let mut limits = ParserLimits::default();
        limits.max_errors = Some(3);
        // bad tokens interleaved with good values: consecutive count keeps
        // resetting but the total cap still trips
        let data = b"[ } 1 } 2 } 3 } 4 ]";
        let mut tok = Tokenizer::new(data);
        let mut p = ObjectParser::new(
            &mut tok,
            data,
            "test",
            &limits,
            None,
            ObjGen::DIRECT,
            ParseMode::Object,
            false,
            false,
        );
        assert!(matches!(p.parse_one(), Err(Error::Limit(_))));
    }

    #[test]
    fn test_recovery_container_cap() {
        let mut limits = ParserLimits::default();
        limits.recovery_container_len = 4;
        let data = b"[1 2 3 4 5 6]";
        let mut tok = Tokenizer::new(data);
        let mut p = ObjectParser::new(
            &mut tok,
            data,
            "test",
            &limits,
            None,
            ObjGen::DIRECT,
            ParseMode::Object,
            true,
            false,
        );
        assert!(matches!(p.parse_one(), Err(Error::Limit(_))));
    }

    #[test]
    fn test_unexpected_close_recovers() {
        let (obj, _) = parse_standalone(b"] ] << /K 5 >>", "test").unwrap();
        assert_eq!(obj.dict_get("K").unwrap().as_int().unwrap(), 5);
    }

    #[test]
    fn test_content_mode_operators() {
        let limits = ParserLimits::default();
        let ops = parse_content(b"BT /F1 12 Tf (Hi) Tj ET", "content", &limits).unwrap();
        assert_eq!(ops.len(), 7);
        assert_eq!(ops[0].as_operator().unwrap(), "BT");
        assert_eq!(ops[1].as_name().unwrap().as_str(), "F1");
        assert_eq!(ops[2].as_int().unwrap(), 12);
        assert_eq!(ops[3].as_operator().unwrap(), "Tf");
        assert_eq!(ops[4].as_string().unwrap().as_bytes(), b"Hi");
        assert_eq!(ops[6].as_operator().unwrap(), "ET");
    }

    #[test]
    fn test_content_mode_inline_image() {
        let limits = ParserLimits::default();
        let ops = parse_content(
            b"BI /W 2 /H 2 ID \x01\x02\x03\x04 EI Q",
            "content",
            &limits,
        )
        .unwrap();
        // inline image plus the Q operator
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].raw_value(), Value::InlineImage(_)));
        assert_eq!(ops[1].as_operator().unwrap(), "Q");
    }

    #[test]
    fn test_content_mode_no_stream_promotion() {
        let limits = ParserLimits::default();
        let ops = parse_content(b"<< /K 1 >> stream", "content", &limits).unwrap();
        assert!(ops[0].is_dictionary().unwrap());
        assert_eq!(ops[1].as_operator().unwrap(), "stream");
    }
}
