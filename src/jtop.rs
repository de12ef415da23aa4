// Copyright 2020 Joyent, Inc.

//! JSON to protobuf wire encoder.
//!
//! The encoder walks the token stream of a JSON object once, resolving each
//! object key against the message's name index, and writes wire entries in
//! the order the keys appear. Unknown keys have their whole value skipped.
//! Repeated numeric and boolean fields are written packed.

use std::borrow::Cow;
use std::mem;
use std::str;

use base64::Engine;

use crate::error::TranscodeError;
use crate::metadata::{Field, Message, Schema, TypeKind};
use crate::pool::Reset;
use crate::token::{Iter, Token, TokenKind};
use crate::wire::{self, WireType};

/// Nesting limit for objects and arrays.
const MAX_DEPTH: usize = 100;

/// Encodes the JSON object `data` as a wire record of type `msg`.
pub fn encode(
    schema: &Schema,
    msg: &Message,
    data: &[u8],
) -> Result<Vec<u8>, TranscodeError> {
    Encoder::default().encode(schema, msg, data)
}

/// Reusable JSON to wire encoder state. Holds scratch buffers only; it never
/// keeps a reference into the input after [`encode`](Encoder::encode)
/// returns.
#[derive(Debug, Default)]
pub struct Encoder {
    out: Vec<u8>,
    spare: Vec<Vec<u8>>,
    depth: usize,
}

impl Reset for Encoder {
    fn reset(&mut self) {
        self.out.clear();
        self.depth = 0;
    }
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder::default()
    }

    pub fn encode(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
    ) -> Result<Vec<u8>, TranscodeError> {
        self.reset();
        let mut iter = Iter::new(data);
        match iter.next_token() {
            Some(ref t) if t.kind == TokenKind::ObjectBegin => (),
            _ => {
                return Err(TranscodeError::InvalidInput(String::from(
                    "must be json object",
                )))
            }
        }

        let mut out = mem::replace(&mut self.out, Vec::new());
        let result = self.trans_fields(schema, msg, &mut iter, &mut out);
        let encoded = result.map(|_| out.to_vec());
        out.clear();
        self.out = out;
        encoded
    }

    fn take_buf(&mut self) -> Vec<u8> {
        self.spare.pop().unwrap_or_default()
    }

    fn give_buf(&mut self, mut buf: Vec<u8>) {
        buf.clear();
        self.spare.push(buf);
    }

    fn enter(&mut self) -> Result<(), TranscodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(TranscodeError::InvalidInput(String::from(
                "nesting too deep",
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Encodes the members of an object whose `{` has been consumed.
    fn trans_fields<'a>(
        &mut self,
        schema: &Schema,
        msg: &Message,
        iter: &mut Iter<'a>,
        out: &mut Vec<u8>,
    ) -> Result<(), TranscodeError> {
        self.enter()?;
        loop {
            let tk = next(iter)?;
            match tk.kind {
                TokenKind::ObjectEnd => break,
                TokenKind::Comma => continue,
                TokenKind::String => (),
                _ => return Err(unexpected(&tk, "unexpected key")),
            }
            let key = unescape(tk.unquoted())?;
            expect_colon(iter)?;
            let field = str::from_utf8(&key)
                .ok()
                .and_then(|name| msg.field_by_name(name));
            match field {
                Some(field) => self.trans_value(schema, field, iter, out, false)?,
                None => skip_value(iter)?,
            }
        }
        self.leave();
        Ok(())
    }

    fn trans_value<'a>(
        &mut self,
        schema: &Schema,
        field: &Field,
        iter: &mut Iter<'a>,
        out: &mut Vec<u8>,
        element: bool,
    ) -> Result<(), TranscodeError> {
        let tk = next(iter)?;
        match tk.kind {
            TokenKind::Null => {
                if field.nullable() {
                    Ok(())
                } else {
                    Err(mismatch(&tk, field.kind))
                }
            }
            TokenKind::True | TokenKind::False | TokenKind::Number => {
                let (wire, x) = parse_scalar(&tk, field.kind)?;
                wire::encode_key(out, field.tag, wire);
                wire::encode_raw(out, wire, x);
                Ok(())
            }
            TokenKind::String => trans_string(&tk, field, out),
            TokenKind::ObjectBegin => match field.kind {
                TypeKind::Map => self.trans_map(schema, field, iter, out),
                TypeKind::Message => {
                    let nested = schema.nested(field)?;
                    let mut buf = self.take_buf();
                    let result = self.trans_fields(schema, nested, iter, &mut buf);
                    if result.is_ok() {
                        wire::encode_bytes(out, field.tag, &buf);
                    }
                    self.give_buf(buf);
                    result
                }
                _ => Err(mismatch(&tk, field.kind)),
            },
            TokenKind::ArrayBegin => {
                if element || !field.repeated || field.kind == TypeKind::Map {
                    return Err(mismatch(&tk, field.kind));
                }
                if field.kind.is_scalar() {
                    self.pack_scalars(field, iter, out)
                } else {
                    self.trans_array(schema, field, iter, out)
                }
            }
            TokenKind::Invalid => Err(unexpected(&tk, "")),
            TokenKind::ObjectEnd
            | TokenKind::ArrayEnd
            | TokenKind::Comma
            | TokenKind::Colon => Err(unexpected(&tk, "expect value")),
        }
    }

    fn trans_array<'a>(
        &mut self,
        schema: &Schema,
        field: &Field,
        iter: &mut Iter<'a>,
        out: &mut Vec<u8>,
    ) -> Result<(), TranscodeError> {
        self.enter()?;
        loop {
            match iter.peek_kind() {
                None => return Err(TranscodeError::UnexpectedEof),
                Some(TokenKind::ArrayEnd) => {
                    iter.next_token();
                    break;
                }
                Some(TokenKind::Comma) => {
                    iter.next_token();
                }
                Some(_) => self.trans_value(schema, field, iter, out, true)?,
            }
        }
        self.leave();
        Ok(())
    }

    // https://developers.google.com/protocol-buffers/docs/encoding#packed
    fn pack_scalars<'a>(
        &mut self,
        field: &Field,
        iter: &mut Iter<'a>,
        out: &mut Vec<u8>,
    ) -> Result<(), TranscodeError> {
        let mut packed = self.take_buf();
        let result = loop {
            let tk = match iter.next_token() {
                Some(tk) => tk,
                None => break Err(TranscodeError::UnexpectedEof),
            };
            match tk.kind {
                TokenKind::ArrayEnd => break Ok(()),
                TokenKind::Comma => continue,
                TokenKind::Number
                | TokenKind::True
                | TokenKind::False
                | TokenKind::String => match parse_scalar(&tk, field.kind) {
                    Ok((wire, x)) => wire::encode_raw(&mut packed, wire, x),
                    Err(e) => break Err(e),
                },
                TokenKind::Invalid => break Err(unexpected(&tk, "")),
                _ => break Err(mismatch(&tk, field.kind)),
            }
        };
        if result.is_ok() && !packed.is_empty() {
            wire::encode_bytes(out, field.tag, &packed);
        }
        self.give_buf(packed);
        result
    }

    /// A JSON object bound to a map field: every member becomes one
    /// length-delimited entry holding key (tag 1) and value (tag 2).
    fn trans_map<'a>(
        &mut self,
        schema: &Schema,
        field: &Field,
        iter: &mut Iter<'a>,
        out: &mut Vec<u8>,
    ) -> Result<(), TranscodeError> {
        let (key_field, value_field) = schema.map_entry(field)?;
        self.enter()?;
        let mut entry = self.take_buf();
        let result = loop {
            let tk = match iter.next_token() {
                Some(tk) => tk,
                None => break Err(TranscodeError::UnexpectedEof),
            };
            match tk.kind {
                TokenKind::ObjectEnd => break Ok(()),
                TokenKind::Comma => continue,
                TokenKind::String => (),
                _ => break Err(unexpected(&tk, "unexpected key")),
            }
            entry.clear();
            let step = encode_map_key(&tk, key_field, &mut entry)
                .and_then(|_| expect_colon(iter))
                .and_then(|_| {
                    self.trans_value(schema, value_field, iter, &mut entry, false)
                });
            if let Err(e) = step {
                break Err(e);
            }
            wire::encode_bytes(out, field.tag, &entry);
        };
        self.give_buf(entry);
        if result.is_ok() {
            self.leave();
        }
        result
    }
}

fn next<'a>(iter: &mut Iter<'a>) -> Result<Token<'a>, TranscodeError> {
    iter.next_token().ok_or(TranscodeError::UnexpectedEof)
}

fn expect_colon(iter: &mut Iter) -> Result<(), TranscodeError> {
    let tk = next(iter)?;
    if tk.kind == TokenKind::Colon {
        Ok(())
    } else {
        Err(unexpected(&tk, "expect colon"))
    }
}

fn mismatch(tk: &Token, kind: TypeKind) -> TranscodeError {
    TranscodeError::TypeMismatch {
        found: tk.kind.json_type(),
        kind,
    }
}

fn unexpected(tk: &Token, reason: &str) -> TranscodeError {
    TranscodeError::invalid_value(tk.lossy(), reason)
}

/// Skips one complete value, including any nested objects and arrays.
fn skip_value(iter: &mut Iter) -> Result<(), TranscodeError> {
    let first = next(iter)?;
    match first.kind {
        TokenKind::ObjectBegin | TokenKind::ArrayBegin => (),
        TokenKind::Invalid => return Err(unexpected(&first, "")),
        k if k.is_value() => return Ok(()),
        _ => return Err(unexpected(&first, "expect value")),
    }
    let mut depth = 1usize;
    while depth != 0 {
        let tk = next(iter)?;
        match tk.kind {
            TokenKind::ObjectBegin | TokenKind::ArrayBegin => depth += 1,
            TokenKind::ObjectEnd | TokenKind::ArrayEnd => depth -= 1,
            TokenKind::Invalid => return Err(unexpected(&tk, "")),
            _ => (),
        }
    }
    Ok(())
}

/// Numeric and boolean tokens as the raw wire value of `kind`. The strings
/// `NaN`, `Infinity` and `-Infinity` are accepted for float kinds.
fn parse_scalar(tk: &Token, kind: TypeKind) -> Result<(WireType, u64), TranscodeError> {
    match (tk.kind, kind) {
        (TokenKind::True, TypeKind::Bool) => Ok((WireType::Varint, 1)),
        (TokenKind::False, TypeKind::Bool) => Ok((WireType::Varint, 0)),
        (TokenKind::Number, k) if k.is_scalar() && k != TypeKind::Bool => {
            let text = tk
                .text()
                .ok_or_else(|| unexpected(tk, "invalid number"))?;
            wire::parse_scalar(kind, text)
        }
        (TokenKind::String, k) if k.is_float() => {
            let text = str::from_utf8(tk.unquoted()).unwrap_or("");
            match text {
                "NaN" | "Infinity" | "-Infinity" => wire::parse_scalar(kind, text),
                _ => Err(mismatch(tk, kind)),
            }
        }
        _ => Err(mismatch(tk, kind)),
    }
}

fn trans_string(tk: &Token, field: &Field, out: &mut Vec<u8>) -> Result<(), TranscodeError> {
    match field.kind {
        TypeKind::String => {
            let s = unescape(tk.unquoted())?;
            if str::from_utf8(&s).is_err() {
                return Err(unexpected(tk, "invalid utf-8"));
            }
            wire::encode_bytes(out, field.tag, &s);
            Ok(())
        }
        TypeKind::Bytes => {
            let body = unescape(tk.unquoted())?;
            let b = base64::engine::general_purpose::STANDARD
                .decode(&body)
                .map_err(|e| unexpected(tk, &e.to_string()))?;
            wire::encode_bytes(out, field.tag, &b);
            Ok(())
        }
        TypeKind::Float | TypeKind::Double => {
            let (wire, x) = parse_scalar(tk, field.kind)?;
            wire::encode_key(out, field.tag, wire);
            wire::encode_raw(out, wire, x);
            Ok(())
        }
        _ => Err(mismatch(tk, field.kind)),
    }
}

/// JSON object keys are always strings; non-string map keys are parsed from
/// the key text.
fn encode_map_key(tk: &Token, key: &Field, entry: &mut Vec<u8>) -> Result<(), TranscodeError> {
    let raw = unescape(tk.unquoted())?;
    let text = str::from_utf8(&raw).map_err(|_| unexpected(tk, "invalid utf-8"))?;
    match key.kind {
        TypeKind::String => {
            wire::encode_bytes(entry, key.tag, text.as_bytes());
            return Ok(());
        }
        TypeKind::Bool => {
            let x = match text {
                "true" => 1,
                "false" => 0,
                _ => return Err(unexpected(tk, "invalid bool key")),
            };
            wire::encode_key(entry, key.tag, WireType::Varint);
            wire::encode_varint(entry, x);
        }
        _ => {
            let (wire, x) = wire::parse_scalar(key.kind, text)?;
            wire::encode_key(entry, key.tag, wire);
            wire::encode_raw(entry, wire, x);
        }
    }
    Ok(())
}

/// Interprets JSON string escapes. Bodies without a backslash are returned
/// as is.
pub fn unescape(body: &[u8]) -> Result<Cow<[u8]>, TranscodeError> {
    if !body.contains(&b'\\') {
        return Ok(Cow::Borrowed(body));
    }

    let bad = |why: &str| TranscodeError::invalid_value(String::from_utf8_lossy(body), why);
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let c = body[i];
        i += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let e = *body.get(i).ok_or_else(|| bad("invalid escape"))?;
        i += 1;
        match e {
            b'"' | b'\\' | b'/' => out.push(e),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'u' => {
                let hi = hex4(body, i).ok_or_else(|| bad("invalid unicode escape"))?;
                i += 4;
                let code = if (0xd800..0xdc00).contains(&hi) {
                    let lo = if body.get(i) == Some(&b'\\') && body.get(i + 1) == Some(&b'u') {
                        hex4(body, i + 2)
                    } else {
                        None
                    };
                    match lo {
                        Some(lo) if (0xdc00..0xe000).contains(&lo) => {
                            i += 6;
                            0x10000 + ((hi - 0xd800) << 10) + (lo - 0xdc00)
                        }
                        _ => return Err(bad("unpaired surrogate")),
                    }
                } else {
                    hi
                };
                let ch = std::char::from_u32(code).ok_or_else(|| bad("invalid code point"))?;
                let mut tmp = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
            }
            _ => return Err(bad("invalid escape")),
        }
    }
    Ok(Cow::Owned(out))
}

fn hex4(body: &[u8], at: usize) -> Option<u32> {
    let digits = body.get(at..at + 4)?;
    let text = str::from_utf8(digits).ok()?;
    u32::from_str_radix(text, 16).ok()
}
