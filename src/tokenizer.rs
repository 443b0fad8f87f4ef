//! PDF tokenizer
//!
//! Turns a byte slice into the flat token stream the object parser
//! consumes. Every token carries the byte offset it started at; offsets are
//! what error messages and stream-length recovery key off. String tokens
//! hold raw bytes because PDF strings may embed arbitrary binary data.

use bytes::Bytes;

/// One lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// End of input
    Eof,
    /// Array start: `[`
    ArrayOpen,
    /// Array end: `]`
    ArrayClose,
    /// Dictionary start: `<<`
    DictOpen,
    /// Dictionary end: `>>`
    DictClose,
    /// Name with `#xx` escapes decoded, without the leading slash
    Name(String),
    /// Literal or hex string, decoded to raw bytes
    String(Vec<u8>),
    /// Integer number
    Integer(i64),
    /// Real number, kept as its original text for round-trip fidelity
    Real(String),
    /// `true` or `false`
    Boolean(bool),
    /// `null`
    Null,
    /// Bare keyword: `obj`, `endobj`, `R`, `stream`, content operators, ...
    Word(String),
    /// Invalid input, carrying the raw text and a description
    Bad(String, String),
}

/// A token plus the offset of its first byte
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

impl Token {
    fn new(kind: TokenKind, offset: usize) -> Self {
        Self { kind, offset }
    }

    /// True when this token is a bare keyword equal to `word`
    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w == word)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.kind {
            TokenKind::Integer(v) => Some(v),
            _ => None,
        }
    }
}

/// PDF whitespace per ISO 32000 (NUL, tab, LF, FF, CR, space)
pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, 0 | 9 | 10 | 12 | 13 | 32)
}

/// PDF delimiter characters
pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// PDF tokenizer over a byte slice
pub struct Tokenizer<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a tokenizer for the given data
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Create a tokenizer positioned at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            position: offset.min(data.len()),
        }
    }

    /// Current position in the input
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Reposition the tokenizer
    pub fn seek(&mut self, pos: usize) {
        self.position = pos.min(self.data.len());
    }

    /// Check if the end of input was reached
    pub fn at_end(&self) -> bool {
        self.position >= self.data.len()
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.position + offset).copied()
    }

    fn next_byte(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.position += 1;
        Some(b)
    }

    /// Skip whitespace and comments
    fn skip_ignorable(&mut self) {
        while let Some(b) = self.peek() {
            if is_whitespace(b) {
                self.position += 1;
            } else if b == b'%' {
                while let Some(b) = self.next_byte() {
                    if b == b'\n' || b == b'\r' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Skip the single end-of-line sequence that follows a `stream` keyword.
    ///
    /// Only one CR, LF, or CRLF is consumed; anything further is stream
    /// payload and must not be stripped.
    pub fn skip_stream_eol(&mut self) {
        if self.peek() == Some(b'\r') {
            self.position += 1;
        }
        if self.peek() == Some(b'\n') {
            self.position += 1;
        }
    }

    fn read_name(&mut self) -> Token {
        let start = self.position;
        self.position += 1; // skip '/'

        let mut value = String::new();
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.position += 1;
            if b == b'#' {
                if let (Some(h1), Some(h2)) = (self.peek_at(0), self.peek_at(1)) {
                    if h1.is_ascii_hexdigit() && h2.is_ascii_hexdigit() {
                        self.position += 2;
                        let code = (hex_value(h1) << 4) | hex_value(h2);
                        value.push(code as char);
                        continue;
                    }
                }
            }
            value.push(b as char);
        }

        Token::new(TokenKind::Name(value), start)
    }

    fn read_literal_string(&mut self) -> Token {
        let start = self.position;
        self.position += 1; // skip '('

        let mut value = Vec::new();
        let mut depth = 1u32;

        while let Some(b) = self.next_byte() {
            match b {
                b'(' => {
                    depth += 1;
                    value.push(b'(');
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Token::new(TokenKind::String(value), start);
                    }
                    value.push(b')');
                }
                b'\\' => match self.next_byte() {
                    Some(b'n') => value.push(b'\n'),
                    Some(b'r') => value.push(b'\r'),
                    Some(b't') => value.push(b'\t'),
                    Some(b'b') => value.push(0x08),
                    Some(b'f') => value.push(0x0c),
                    Some(b'(') => value.push(b'('),
                    Some(b')') => value.push(b')'),
                    Some(b'\\') => value.push(b'\\'),
                    Some(b'\r') => {
                        // line continuation, CRLF counts as one
                        if self.peek() == Some(b'\n') {
                            self.position += 1;
                        }
                    }
                    Some(b'\n') => {}
                    Some(escaped @ b'0'..=b'7') => {
                        let mut octal = (escaped - b'0') as u32;
                        for _ in 0..2 {
                            match self.peek() {
                                Some(ob @ b'0'..=b'7') => {
                                    self.position += 1;
                                    octal = octal * 8 + (ob - b'0') as u32;
                                }
                                _ => break,
                            }
                        }
                        value.push((octal & 0xff) as u8);
                    }
                    Some(other) => value.push(other),
                    None => break,
                },
                _ => value.push(b),
            }
        }

        Token::new(
            TokenKind::Bad(
                String::from_utf8_lossy(&self.data[start..self.position]).into_owned(),
                "unterminated string".into(),
            ),
            start,
        )
    }

    fn read_hex_string(&mut self) -> Token {
        let start = self.position;
        self.position += 1; // skip '<'

        let mut digits = Vec::new();
        loop {
            match self.next_byte() {
                Some(b'>') => break,
                Some(b) if is_whitespace(b) => {}
                Some(b) if b.is_ascii_hexdigit() => digits.push(b),
                Some(_) => {
                    return Token::new(
                        TokenKind::Bad(
                            String::from_utf8_lossy(&self.data[start..self.position]).into_owned(),
                            "invalid character in hex string".into(),
                        ),
                        start,
                    );
                }
                None => {
                    return Token::new(
                        TokenKind::Bad(
                            String::from_utf8_lossy(&self.data[start..self.position]).into_owned(),
                            "unterminated hex string".into(),
                        ),
                        start,
                    );
                }
            }
        }

        // Odd digit count: the final digit gets a trailing zero
        if digits.len() % 2 != 0 {
            digits.push(b'0');
        }

        let mut value = Vec::with_capacity(digits.len() / 2);
        for pair in digits.chunks(2) {
            value.push((hex_value(pair[0]) << 4) | hex_value(pair[1]));
        }
        Token::new(TokenKind::String(value), start)
    }

    fn read_number(&mut self) -> Token {
        let start = self.position;
        let mut text = String::new();
        let mut saw_digit = false;
        let mut saw_point = false;

        if let Some(b @ (b'+' | b'-')) = self.peek() {
            text.push(b as char);
            self.position += 1;
        }

        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                saw_digit = true;
                text.push(b as char);
                self.position += 1;
            } else if b == b'.' && !saw_point {
                saw_point = true;
                text.push('.');
                self.position += 1;
            } else {
                break;
            }
        }

        if !saw_digit {
            return Token::new(TokenKind::Bad(text, "sign or point with no digits".into()), start);
        }

        if saw_point {
            Token::new(TokenKind::Real(text), start)
        } else {
            match text.parse::<i64>() {
                Ok(v) => Token::new(TokenKind::Integer(v), start),
                // Out-of-range integers degrade to reals, as readers
                // commonly treat them
                Err(_) => Token::new(TokenKind::Real(text), start),
            }
        }
    }

    fn read_word(&mut self) -> Token {
        let start = self.position;
        let mut value = String::new();

        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            value.push(b as char);
            self.position += 1;
        }

        let kind = match value.as_str() {
            "true" => TokenKind::Boolean(true),
            "false" => TokenKind::Boolean(false),
            "null" => TokenKind::Null,
            _ => TokenKind::Word(value),
        };
        Token::new(kind, start)
    }

    /// Get the next token, skipping whitespace and comments
    pub fn next_token(&mut self) -> Token {
        self.skip_ignorable();

        let start = self.position;
        let b = match self.peek() {
            Some(b) => b,
            None => return Token::new(TokenKind::Eof, start),
        };

        match b {
            b'[' => {
                self.position += 1;
                Token::new(TokenKind::ArrayOpen, start)
            }
            b']' => {
                self.position += 1;
                Token::new(TokenKind::ArrayClose, start)
            }
            b'<' => {
                if self.peek_at(1) == Some(b'<') {
                    self.position += 2;
                    Token::new(TokenKind::DictOpen, start)
                } else {
                    self.read_hex_string()
                }
            }
            b'>' => {
                if self.peek_at(1) == Some(b'>') {
                    self.position += 2;
                    Token::new(TokenKind::DictClose, start)
                } else {
                    self.position += 1;
                    Token::new(TokenKind::Bad(">".into(), "unexpected '>'".into()), start)
                }
            }
            b'{' | b'}' => {
                self.position += 1;
                Token::new(
                    TokenKind::Bad((b as char).to_string(), "unexpected brace".into()),
                    start,
                )
            }
            b')' => {
                self.position += 1;
                Token::new(TokenKind::Bad(")".into(), "unexpected ')'".into()), start)
            }
            b'/' => self.read_name(),
            b'(' => self.read_literal_string(),
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.read_number(),
            _ => self.read_word(),
        }
    }

    /// Peek at the next token without consuming it
    pub fn peek_token(&mut self) -> Token {
        let saved = self.position;
        let token = self.next_token();
        self.position = saved;
        token
    }

    /// Read inline image data following an `ID` keyword, up to a
    /// whitespace-delimited `EI` marker. Returns the raw payload.
    pub fn read_inline_image_data(&mut self) -> Bytes {
        // single whitespace byte after ID separates it from the data
        if let Some(b) = self.peek() {
            if is_whitespace(b) {
                self.position += 1;
            }
        }

        let start = self.position;
        let mut end = self.data.len();
        let mut i = self.position;
        while i < self.data.len() {
            let b = self.data[i];
            if is_whitespace(b)
                && self.data.get(i + 1) == Some(&b'E')
                && self.data.get(i + 2) == Some(&b'I')
            {
                let boundary = match self.data.get(i + 3) {
                    None => true,
                    Some(&after) => is_whitespace(after) || is_delimiter(after),
                };
                if boundary {
                    end = i;
                    self.position = i + 3;
                    return Bytes::copy_from_slice(&self.data[start..end]);
                }
            }
            i += 1;
        }

        // no EI marker, consume the rest
        self.position = self.data.len();
        Bytes::copy_from_slice(&self.data[start..end])
    }
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}
