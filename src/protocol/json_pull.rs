//! Incremental JSON pull tokenizer over a chunked byte stream.
//!
//! Tokens are produced one at a time; the tokenizer only ever holds the current
//! chunk plus the token being built, and suspends on the source stream when it
//! needs more bytes. Container nesting is tracked so callers can tell a top-level
//! key from a same-named key nested inside a row.

use futures_util::{Stream, StreamExt};

use crate::error::{AceQLError, AceQLResult, ProtocolError};

#[derive(Debug, Clone, PartialEq)]
pub enum JsonToken {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    Key(String),
    Str(String),
    /// Numeric literal, kept as written.
    Number(String),
    Bool(bool),
    Null,
}

impl JsonToken {
    /// Text form of a scalar token; `None` for structural tokens and `null`.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            JsonToken::Str(s) | JsonToken::Number(s) => Some(s.clone()),
            JsonToken::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, JsonToken::Str(_) | JsonToken::Number(_) | JsonToken::Bool(_) | JsonToken::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    ObjKeyOrEnd,
    ObjKey,
    ObjValue,
    ObjCommaOrEnd,
    ArrValueOrEnd,
    ArrValue,
    ArrCommaOrEnd,
}

impl Frame {
    fn is_array(self) -> bool { matches!(self, Frame::ArrValueOrEnd | Frame::ArrValue | Frame::ArrCommaOrEnd) }
}

pub struct JsonPullParser<S, B> {
    source: S,
    chunk: Option<B>,
    pos: usize,
    consumed: u64,
    frames: Vec<Frame>,
    root_done: bool,
    source_done: bool,
}

impl<S, B> JsonPullParser<S, B>
where
    S: Stream<Item = AceQLResult<B>> + Unpin,
    B: AsRef<[u8]>,
{
    pub fn new(source: S) -> Self {
        Self { source, chunk: None, pos: 0, consumed: 0, frames: Vec::new(), root_done: false, source_done: false }
    }

    /// Number of open containers around the next token. A key returned at depth 1
    /// belongs to the top-level object.
    pub fn depth(&self) -> usize { self.frames.len() }

    /// Number of open arrays around the next token.
    pub fn array_depth(&self) -> usize { self.frames.iter().filter(|f| f.is_array()).count() }

    pub fn bytes_consumed(&self) -> u64 { self.consumed }

    pub async fn next_token(&mut self) -> AceQLResult<Option<JsonToken>> {
        loop {
            self.skip_ws().await?;
            let state = self.frames.last().copied();
            match state {
                None => {
                    let b = self.peek_byte().await?;
                    if self.root_done {
                        return match b {
                            None => Ok(None),
                            Some(c) => Err(self.syntax(format!("trailing character '{}' after document", c as char))),
                        };
                    }
                    return match b {
                        None => Ok(None),
                        Some(_) => self.read_value().await.map(Some),
                    };
                }
                Some(Frame::ObjKeyOrEnd) | Some(Frame::ObjKey) => {
                    let b = self.require_byte().await?;
                    if b == b'}' && state == Some(Frame::ObjKeyOrEnd) {
                        self.bump();
                        return Ok(Some(self.close(JsonToken::EndObject)));
                    }
                    if b != b'"' {
                        return Err(self.syntax(format!("expected object key, found '{}'", b as char)));
                    }
                    self.bump();
                    let key = self.read_string_body().await?;
                    self.skip_ws().await?;
                    let colon = self.require_byte().await?;
                    if colon != b':' {
                        return Err(self.syntax(format!("expected ':' after key \"{}\"", key)));
                    }
                    self.bump();
                    self.set_top(Frame::ObjValue);
                    return Ok(Some(JsonToken::Key(key)));
                }
                Some(Frame::ObjValue) => {
                    self.set_top(Frame::ObjCommaOrEnd);
                    return self.read_value().await.map(Some);
                }
                Some(Frame::ObjCommaOrEnd) => {
                    match self.require_byte().await? {
                        b',' => { self.bump(); self.set_top(Frame::ObjKey); continue; }
                        b'}' => { self.bump(); return Ok(Some(self.close(JsonToken::EndObject))); }
                        c => return Err(self.syntax(format!("expected ',' or '}}' in object, found '{}'", c as char))),
                    }
                }
                Some(Frame::ArrValueOrEnd) | Some(Frame::ArrValue) => {
                    let b = self.require_byte().await?;
                    if b == b']' && state == Some(Frame::ArrValueOrEnd) {
                        self.bump();
                        return Ok(Some(self.close(JsonToken::EndArray)));
                    }
                    self.set_top(Frame::ArrCommaOrEnd);
                    return self.read_value().await.map(Some);
                }
                Some(Frame::ArrCommaOrEnd) => {
                    match self.require_byte().await? {
                        b',' => { self.bump(); self.set_top(Frame::ArrValue); continue; }
                        b']' => { self.bump(); return Ok(Some(self.close(JsonToken::EndArray))); }
                        c => return Err(self.syntax(format!("expected ',' or ']' in array, found '{}'", c as char))),
                    }
                }
            }
        }
    }

    /// Next token, treating end of input as a protocol error.
    pub async fn require_token(&mut self) -> AceQLResult<JsonToken> {
        match self.next_token().await? {
            Some(t) => Ok(t),
            None => Err(self.syntax("unexpected end of result stream".to_string())),
        }
    }

    /// Consume the next value whole (scalar or container).
    pub async fn skip_value(&mut self) -> AceQLResult<()> {
        let mut level: usize = 0;
        loop {
            match self.require_token().await? {
                JsonToken::StartObject | JsonToken::StartArray => level += 1,
                JsonToken::EndObject | JsonToken::EndArray => {
                    if level == 0 {
                        return Err(self.syntax("unexpected end of container while skipping value".to_string()));
                    }
                    level -= 1;
                }
                JsonToken::Key(_) => {
                    if level == 0 {
                        return Err(self.syntax("unexpected key while skipping value".to_string()));
                    }
                }
                _ => {}
            }
            if level == 0 { return Ok(()); }
        }
    }

    /// Read the next token and require a scalar; `null` maps to `None`.
    pub async fn read_scalar(&mut self) -> AceQLResult<Option<String>> {
        let tok = self.require_token().await?;
        if !tok.is_scalar() {
            return Err(self.syntax(format!("expected scalar value, found {:?}", tok)));
        }
        Ok(tok.scalar_text())
    }

    async fn read_value(&mut self) -> AceQLResult<JsonToken> {
        let b = self.require_byte().await?;
        let tok = match b {
            b'{' => { self.bump(); self.frames.push(Frame::ObjKeyOrEnd); return Ok(JsonToken::StartObject); }
            b'[' => { self.bump(); self.frames.push(Frame::ArrValueOrEnd); return Ok(JsonToken::StartArray); }
            b'"' => { self.bump(); JsonToken::Str(self.read_string_body().await?) }
            b't' => { self.expect_literal(b"true").await?; JsonToken::Bool(true) }
            b'f' => { self.expect_literal(b"false").await?; JsonToken::Bool(false) }
            b'n' => { self.expect_literal(b"null").await?; JsonToken::Null }
            b'-' | b'0'..=b'9' => JsonToken::Number(self.read_number().await?),
            c => return Err(self.syntax(format!("unexpected character '{}'", c as char))),
        };
        if self.frames.is_empty() { self.root_done = true; }
        Ok(tok)
    }

    async fn read_string_body(&mut self) -> AceQLResult<String> {
        let mut out: Vec<u8> = Vec::new();
        loop {
            let b = self.require_byte().await?;
            self.bump();
            match b {
                b'"' => break,
                b'\\' => {
                    let e = self.require_byte().await?;
                    self.bump();
                    match e {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0C),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => {
                            let ch = self.read_unicode_escape().await?;
                            let mut buf = [0u8; 4];
                            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        }
                        other => return Err(self.syntax(format!("invalid escape '\\{}'", other as char))),
                    }
                }
                _ => out.push(b),
            }
        }
        String::from_utf8(out).map_err(|_| self.syntax("invalid UTF-8 in string".to_string()))
    }

    async fn read_unicode_escape(&mut self) -> AceQLResult<char> {
        let high = self.read_hex4().await?;
        if (0xD800..0xDC00).contains(&high) {
            // surrogate pair: expect \uDC00..\uDFFF
            let bs = self.require_byte().await?;
            self.bump();
            let u = self.require_byte().await?;
            self.bump();
            if bs != b'\\' || u != b'u' {
                return Err(self.syntax("unpaired surrogate in \\u escape".to_string()));
            }
            let low = self.read_hex4().await?;
            if !(0xDC00..0xE000).contains(&low) {
                return Err(self.syntax("invalid low surrogate in \\u escape".to_string()));
            }
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            return char::from_u32(code).ok_or_else(|| self.syntax("invalid code point".to_string()));
        }
        char::from_u32(high).ok_or_else(|| self.syntax("invalid code point".to_string()))
    }

    async fn read_hex4(&mut self) -> AceQLResult<u32> {
        let mut v: u32 = 0;
        for _ in 0..4 {
            let b = self.require_byte().await?;
            self.bump();
            let d = (b as char).to_digit(16).ok_or_else(|| self.syntax("invalid hex digit in \\u escape".to_string()))?;
            v = v * 16 + d;
        }
        Ok(v)
    }

    async fn read_number(&mut self) -> AceQLResult<String> {
        let mut s = String::new();
        while let Some(b) = self.peek_byte().await? {
            if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E') {
                s.push(b as char);
                self.bump();
            } else {
                break;
            }
        }
        if s.parse::<f64>().is_err() {
            return Err(self.syntax(format!("invalid number '{}'", s)));
        }
        Ok(s)
    }

    async fn expect_literal(&mut self, lit: &[u8]) -> AceQLResult<()> {
        for &expected in lit {
            let b = self.require_byte().await?;
            if b != expected {
                return Err(self.syntax(format!("invalid literal, expected '{}'", String::from_utf8_lossy(lit))));
            }
            self.bump();
        }
        Ok(())
    }

    async fn skip_ws(&mut self) -> AceQLResult<()> {
        while let Some(b) = self.peek_byte().await? {
            if matches!(b, b' ' | b'\t' | b'\n' | b'\r') { self.bump(); } else { break; }
        }
        Ok(())
    }

    async fn peek_byte(&mut self) -> AceQLResult<Option<u8>> {
        loop {
            if let Some(chunk) = &self.chunk {
                let bytes = chunk.as_ref();
                if self.pos < bytes.len() {
                    return Ok(Some(bytes[self.pos]));
                }
            }
            if self.source_done { return Ok(None); }
            match self.source.next().await {
                Some(Ok(next)) => {
                    self.chunk = Some(next);
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(e),
                None => {
                    self.chunk = None;
                    self.source_done = true;
                    return Ok(None);
                }
            }
        }
    }

    async fn require_byte(&mut self) -> AceQLResult<u8> {
        match self.peek_byte().await? {
            Some(b) => Ok(b),
            None => Err(self.syntax("unexpected end of result stream".to_string())),
        }
    }

    fn bump(&mut self) {
        self.pos += 1;
        self.consumed += 1;
    }

    fn set_top(&mut self, f: Frame) {
        if let Some(top) = self.frames.last_mut() { *top = f; }
    }

    fn close(&mut self, tok: JsonToken) -> JsonToken {
        self.frames.pop();
        if self.frames.is_empty() { self.root_done = true; }
        tok
    }

    fn syntax(&self, msg: String) -> AceQLError {
        AceQLError::Protocol(ProtocolError::new(0, format!("malformed JSON result at byte {}: {}", self.consumed, msg)))
    }
}
