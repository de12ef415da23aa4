// Copyright 2020 Joyent, Inc.

//! Protobuf wire to JSON encoder.
//!
//! The standard path decodes a whole wire record into one slot per declared
//! field and then writes the JSON object walking the fields in declaration
//! order:
//!
//! * a singular field keeps the last value seen on the wire
//! * repeated and map fields collect every occurrence in wire order
//! * an unset field is written as its kind's default literal (`0`, `false`,
//!   `""`, `{}` or `[]`), or left out entirely when marked `omit_empty`
//! * tags the message does not declare are skipped
//!
//! [`Encoder::encode_fast`] produces the same bytes in a single pass; see
//! the `fast` module.

use std::io::Write;

use base64::Engine;

use crate::error::TranscodeError;
use crate::metadata::{Field, Message, Schema, TypeKind};
use crate::pool::Reset;
use crate::wire::{self, WireReader, WireType, WireValue};

mod fast;

/// Nesting limit for messages within messages, flat ones included.
const MAX_DEPTH: usize = 100;

/// Converts the wire record `data` of type `msg` to JSON.
pub fn encode(schema: &Schema, msg: &Message, data: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    let mut enc = Encoder::new();
    enc.encode(schema, msg, data)?;
    Ok(enc.buf)
}

/// Same as [`encode`], using the single-pass variant.
pub fn encode_fast(
    schema: &Schema,
    msg: &Message,
    data: &[u8],
) -> Result<Vec<u8>, TranscodeError> {
    let mut enc = Encoder::new();
    enc.encode_fast(schema, msg, data)?;
    Ok(enc.buf)
}

/// Wire to JSON encoder holding the output buffer. Each successful call
/// appends one JSON document; a failed call leaves the buffer as it was.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
    fast: bool,
    depth: usize,
}

impl Reset for Encoder {
    fn reset(&mut self) {
        self.buf.clear();
        self.fast = false;
        self.depth = 0;
    }
}

/// The values decoded for one declared field.
#[derive(Debug, Clone, Default)]
struct Slot<'a> {
    first: Option<WireValue<'a>>,
    more: Vec<WireValue<'a>>,
}

impl<'a> Slot<'a> {
    fn values(&self) -> impl Iterator<Item = &WireValue<'a>> {
        self.first.iter().chain(self.more.iter())
    }
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn encode(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
    ) -> Result<(), TranscodeError> {
        self.fast = false;
        self.encode_top(schema, msg, data)
    }

    pub fn encode_fast(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
    ) -> Result<(), TranscodeError> {
        self.fast = true;
        self.encode_top(schema, msg, data)
    }

    fn encode_top(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
    ) -> Result<(), TranscodeError> {
        let start = self.buf.len();
        self.depth = 0;
        let result = if msg.is_flat() {
            let mut more = false;
            self.splice(schema, msg, data, &mut more)
        } else {
            self.object(schema, msg, data)
        };
        if result.is_err() {
            self.buf.truncate(start);
        }
        result
    }

    fn enter(&mut self) -> Result<(), TranscodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(TranscodeError::InvalidInput(String::from(
                "nesting too deep",
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// A message written as a braced JSON object.
    fn object(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
    ) -> Result<(), TranscodeError> {
        self.buf.push(b'{');
        let mut more = false;
        self.splice(schema, msg, data, &mut more)?;
        self.buf.push(b'}');
        Ok(())
    }

    /// A flat message: its members written into the enclosing object.
    fn splice(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
        more: &mut bool,
    ) -> Result<(), TranscodeError> {
        self.enter()?;
        let result = if self.fast {
            self.fast_members(schema, msg, data, more)
        } else {
            self.members(schema, msg, data, more)
        };
        self.leave();
        result
    }

    fn members(
        &mut self,
        schema: &Schema,
        msg: &Message,
        data: &[u8],
        more: &mut bool,
    ) -> Result<(), TranscodeError> {
        let slots = collect(msg, data)?;
        for (field, slot) in msg.fields().iter().zip(slots.iter()) {
            match slot.first {
                None => self.write_default(schema, field, more)?,
                Some(ref value) => {
                    if spliced(schema, field)? {
                        self.splice(schema, schema.nested(field)?, value.bytes(), more)?;
                        continue;
                    }
                    self.write_name(field, more);
                    if field.kind == TypeKind::Map {
                        self.buf.push(b'{');
                        let mut first = true;
                        for value in slot.values() {
                            self.write_entry(schema, field, value.bytes(), &mut first)?;
                        }
                        self.buf.push(b'}');
                    } else if field.repeated {
                        self.buf.push(b'[');
                        let mut first = true;
                        for value in slot.values() {
                            self.write_element(schema, field, value, &mut first)?;
                        }
                        self.buf.push(b']');
                    } else {
                        self.write_value(schema, field, value)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_name(&mut self, field: &Field, more: &mut bool) {
        if *more {
            self.buf.push(b',');
        }
        *more = true;
        self.write_string(field.name.as_bytes());
        self.buf.push(b':');
    }

    /// An unset field.
    fn write_default(
        &mut self,
        schema: &Schema,
        field: &Field,
        more: &mut bool,
    ) -> Result<(), TranscodeError> {
        if field.options.omit_empty {
            return Ok(());
        }
        if spliced(schema, field)? {
            return self.splice(schema, schema.nested(field)?, &[], more);
        }
        self.write_name(field, more);
        if field.repeated && field.kind != TypeKind::Map {
            self.buf.extend_from_slice(b"[]");
        } else {
            self.buf.extend_from_slice(field.kind.default_literal().as_bytes());
        }
        Ok(())
    }

    /// One occurrence of a repeated non-map field. A length-delimited value
    /// of a numeric field is a packed run and contributes all its elements.
    fn write_element(
        &mut self,
        schema: &Schema,
        field: &Field,
        value: &WireValue,
        first: &mut bool,
    ) -> Result<(), TranscodeError> {
        if let WireValue::Bytes(run) = *value {
            if field.kind.is_scalar() {
                let wire = field.kind.wire_type();
                let mut r = WireReader::new(run);
                while !r.is_empty() {
                    let x = r.decode_packed(wire)?;
                    self.separate(first);
                    self.write_scalar(field.kind, x);
                }
                return Ok(());
            }
        }
        self.separate(first);
        self.write_value(schema, field, value)
    }

    fn separate(&mut self, first: &mut bool) {
        if !*first {
            self.buf.push(b',');
        }
        *first = false;
    }

    /// One map entry as a `"key":value` member.
    fn write_entry(
        &mut self,
        schema: &Schema,
        field: &Field,
        entry: &[u8],
        first: &mut bool,
    ) -> Result<(), TranscodeError> {
        let (key_field, value_field) = schema.map_entry(field)?;
        let mut key = None;
        let mut value = None;
        let mut r = WireReader::new(entry);
        while let Some((tag, wire)) = r.decode_key()? {
            let v = r.decode_value(wire)?;
            match tag {
                1 if wire == key_field.kind.wire_type() => key = Some(v),
                2 if value_field.accepts_wire_type(wire) => value = Some(v),
                1 | 2 => {
                    return Err(TranscodeError::InvalidMapEntry(format!(
                        "{}: wire type {} for tag {}",
                        field.name,
                        wire.code(),
                        tag
                    )))
                }
                _ => {
                    return Err(TranscodeError::InvalidMapEntry(format!(
                        "{}: unexpected tag {}",
                        field.name, tag
                    )))
                }
            }
        }

        self.separate(first);
        match (key, key_field.kind) {
            (Some(k), TypeKind::String) => self.write_string(k.bytes()),
            (None, TypeKind::String) => self.buf.extend_from_slice(b"\"\""),
            (Some(k), kind) => {
                self.buf.push(b'"');
                self.write_scalar(kind, k.scalar());
                self.buf.push(b'"');
            }
            (None, kind) => {
                self.buf.push(b'"');
                self.buf.extend_from_slice(kind.default_literal().as_bytes());
                self.buf.push(b'"');
            }
        }
        self.buf.push(b':');
        match value {
            Some(ref v) => self.write_value(schema, value_field, v),
            None => {
                self.buf
                    .extend_from_slice(value_field.kind.default_literal().as_bytes());
                Ok(())
            }
        }
    }

    fn write_value(
        &mut self,
        schema: &Schema,
        field: &Field,
        value: &WireValue,
    ) -> Result<(), TranscodeError> {
        match field.kind {
            TypeKind::String => {
                if field.options.raw_data {
                    self.buf.push(b'"');
                    self.buf.extend_from_slice(value.bytes());
                    self.buf.push(b'"');
                } else {
                    self.write_string(value.bytes());
                }
            }
            TypeKind::Bytes => {
                if field.options.raw_data {
                    self.buf.extend_from_slice(value.bytes());
                } else {
                    self.write_base64(value.bytes());
                }
            }
            TypeKind::Message => self.object(schema, schema.nested(field)?, value.bytes())?,
            kind => self.write_scalar(kind, value.scalar()),
        }
        Ok(())
    }

    fn write_base64(&mut self, data: &[u8]) {
        let engine = &base64::engine::general_purpose::STANDARD;
        let n = base64::encoded_len(data.len(), true).unwrap_or(0);
        self.buf.push(b'"');
        let start = self.buf.len();
        self.buf.resize(start + n, 0);
        let written = engine.encode_slice(data, &mut self.buf[start..]).unwrap_or(0);
        self.buf.truncate(start + written);
        self.buf.push(b'"');
    }

    fn write_scalar(&mut self, kind: TypeKind, x: u64) {
        // Writing to a Vec cannot fail.
        let _ = match kind {
            TypeKind::Int32 | TypeKind::Enum => write!(self.buf, "{}", x as i32),
            TypeKind::Int64 | TypeKind::Sfixed64 => write!(self.buf, "{}", x as i64),
            TypeKind::Sfixed32 => write!(self.buf, "{}", x as u32 as i32),
            TypeKind::Uint32 | TypeKind::Fixed32 => write!(self.buf, "{}", x as u32),
            TypeKind::Sint32 => write!(self.buf, "{}", wire::decode_zigzag32(x)),
            TypeKind::Sint64 => write!(self.buf, "{}", wire::decode_zigzag(x)),
            TypeKind::Bool => write!(self.buf, "{}", x != 0),
            TypeKind::Float => {
                let f = f32::from_bits(x as u32);
                if f.is_finite() {
                    write!(self.buf, "{}", f)
                } else {
                    self.write_non_finite(f64::from(f));
                    Ok(())
                }
            }
            TypeKind::Double => {
                let f = f64::from_bits(x);
                if f.is_finite() {
                    write!(self.buf, "{}", f)
                } else {
                    self.write_non_finite(f);
                    Ok(())
                }
            }
            _ => write!(self.buf, "{}", x),
        };
    }

    fn write_non_finite(&mut self, f: f64) {
        let text: &[u8] = if f.is_nan() {
            b"\"NaN\""
        } else if f > 0.0 {
            b"\"Infinity\""
        } else {
            b"\"-Infinity\""
        };
        self.buf.extend_from_slice(text);
    }

    /// Writes a quoted JSON string. Invalid UTF-8 is replaced with U+FFFD.
    fn write_string(&mut self, s: &[u8]) {
        let s = String::from_utf8_lossy(s);
        self.buf.push(b'"');
        for &c in s.as_bytes() {
            match c {
                b'"' => self.buf.extend_from_slice(b"\\\""),
                b'\\' => self.buf.extend_from_slice(b"\\\\"),
                b'\n' => self.buf.extend_from_slice(b"\\n"),
                b'\r' => self.buf.extend_from_slice(b"\\r"),
                b'\t' => self.buf.extend_from_slice(b"\\t"),
                0x08 => self.buf.extend_from_slice(b"\\b"),
                0x0c => self.buf.extend_from_slice(b"\\f"),
                c if c < 0x20 => {
                    let _ = write!(self.buf, "\\u{:04x}", c);
                }
                c => self.buf.push(c),
            }
        }
        self.buf.push(b'"');
    }
}

/// Whether `field` is written by splicing a flat message into its parent.
fn spliced(schema: &Schema, field: &Field) -> Result<bool, TranscodeError> {
    if field.kind != TypeKind::Message || field.repeated {
        return Ok(false);
    }
    Ok(schema.nested(field)?.is_flat())
}

fn wire_mismatch(field: &Field, wire: WireType) -> TranscodeError {
    TranscodeError::WireTypeMismatch {
        tag: field.tag,
        expected: field.kind.wire_type().code(),
        actual: wire.code(),
    }
}

/// Decodes a whole record into one slot per declared field.
fn collect<'a>(msg: &Message, data: &'a [u8]) -> Result<Vec<Slot<'a>>, TranscodeError> {
    let mut slots = vec![Slot::default(); msg.fields().len()];
    let mut r = WireReader::new(data);
    while let Some((tag, wire)) = r.decode_key()? {
        let value = r.decode_value(wire)?;
        let idx = match msg.tag_index(tag) {
            Some(idx) => idx,
            None => continue,
        };
        let field = &msg.fields()[idx];
        if !field.accepts_wire_type(wire) {
            return Err(wire_mismatch(field, wire));
        }
        let slot = &mut slots[idx];
        if slot.first.is_none() || !field.repeated {
            slot.first = Some(value);
        } else {
            slot.more.push(value);
        }
    }
    Ok(slots)
}
