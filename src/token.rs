// Copyright 2020 Joyent, Inc.

//! Zero-copy JSON tokenizer.
//!
//! [`Iter`] walks a byte buffer and yields [`Token`]s whose `value` is a
//! slice of that buffer. A token is a borrowed view: it is only valid while
//! the source buffer is alive, and must be copied out before it is kept past
//! the encode call that produced it. The lifetime parameter enforces this.
//!
//! The tokenizer only classifies bytes. UTF-8 validity, escape sequences and
//! numeric ranges are checked by the consumer.

use std::fmt;
use std::str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Invalid,
    Null,
    False,
    True,
    Number,
    String,
    ObjectBegin,
    ObjectEnd,
    ArrayBegin,
    ArrayEnd,
    Comma,
    Colon,
}

impl TokenKind {
    /// Tokens that start a JSON value.
    pub fn is_value(self) -> bool {
        match self {
            TokenKind::Null
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Number
            | TokenKind::String
            | TokenKind::ObjectBegin
            | TokenKind::ArrayBegin => true,
            _ => false,
        }
    }

    pub fn json_type(self) -> &'static str {
        match self {
            TokenKind::Null => "null",
            TokenKind::True | TokenKind::False => "bool",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::ObjectBegin | TokenKind::ObjectEnd => "object",
            TokenKind::ArrayBegin | TokenKind::ArrayEnd => "array",
            TokenKind::Comma | TokenKind::Colon => "punctuation",
            TokenKind::Invalid => "invalid",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub value: &'a [u8],
}

impl<'a> Token<'a> {
    /// The token text, for number parsing and error messages.
    pub fn text(&self) -> Option<&'a str> {
        str::from_utf8(self.value).ok()
    }

    /// String body without the surrounding quotes, escapes untouched.
    pub fn unquoted(&self) -> &'a [u8] {
        let v = self.value;
        if self.kind == TokenKind::String && v.len() >= 2 {
            &v[1..v.len() - 1]
        } else {
            v
        }
    }

    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(self.value).into_owned()
    }
}

impl<'a> fmt::Debug for Token<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Kind: [{:?}],Value:[{}]", self.kind, self.lossy())
    }
}

#[derive(Debug, Clone)]
pub struct Iter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iter<'a> {
    pub fn new(buf: &'a [u8]) -> Iter<'a> {
        Iter { buf, pos: 0 }
    }

    /// Points the iterator at a new source buffer.
    pub fn rebind(&mut self, buf: &'a [u8]) {
        self.buf = buf;
        self.pos = 0;
    }

    pub fn source(&self) -> &'a [u8] {
        self.buf
    }

    /// Kind of the next token without consuming it.
    pub fn peek_kind(&self) -> Option<TokenKind> {
        self.clone().next_token().map(|t| t.kind)
    }

    pub fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_whitespace();
        let c = *self.buf.get(self.pos)?;
        let token = match c {
            b't' => self.literal(b"true", TokenKind::True),
            b'f' => self.literal(b"false", TokenKind::False),
            b'n' => self.literal(b"null", TokenKind::Null),
            b'[' => self.single(TokenKind::ArrayBegin),
            b']' => self.single(TokenKind::ArrayEnd),
            b'{' => self.single(TokenKind::ObjectBegin),
            b'}' => self.single(TokenKind::ObjectEnd),
            b',' => self.single(TokenKind::Comma),
            b':' => self.single(TokenKind::Colon),
            b'"' => self.string(),
            b'-' | b'0'..=b'9' => self.number(),
            _ => self.invalid(self.pos),
        };
        Some(token)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.buf.get(self.pos) {
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                _ => return,
            }
        }
    }

    /// Everything from `begin` on is one invalid token; the iterator ends.
    fn invalid(&mut self, begin: usize) -> Token<'a> {
        self.pos = self.buf.len();
        Token {
            kind: TokenKind::Invalid,
            value: &self.buf[begin..],
        }
    }

    fn single(&mut self, kind: TokenKind) -> Token<'a> {
        let begin = self.pos;
        self.pos += 1;
        Token {
            kind,
            value: &self.buf[begin..self.pos],
        }
    }

    fn literal(&mut self, word: &[u8], kind: TokenKind) -> Token<'a> {
        let begin = self.pos;
        let end = begin + word.len();
        if end > self.buf.len() || &self.buf[begin..end] != word {
            return self.invalid(begin);
        }
        self.pos = end;
        Token {
            kind,
            value: &self.buf[begin..end],
        }
    }

    fn number(&mut self) -> Token<'a> {
        let begin = self.pos;
        while let Some(&c) = self.buf.get(self.pos) {
            match c {
                b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        Token {
            kind: TokenKind::Number,
            value: &self.buf[begin..self.pos],
        }
    }

    fn string(&mut self) -> Token<'a> {
        let begin = self.pos;
        let mut escaped = false;
        self.pos += 1;
        while let Some(&c) = self.buf.get(self.pos) {
            self.pos += 1;
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                return Token {
                    kind: TokenKind::String,
                    value: &self.buf[begin..self.pos],
                };
            }
        }
        self.invalid(begin)
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        self.next_token()
    }
}
