// Copyright 2020 Joyent, Inc.

//! Protobuf wire format primitives shared by all encoders.
//!
//! A wire record is a sequence of `key value` pairs. The key is the varint
//! `tag << 3 | wire_type`, the value layout is given by the wire type:
//!
//! * `0` varint: little-endian base-128 integer, at most 10 bytes
//! * `1` fixed64: 8 bytes little-endian
//! * `2` length-delimited: varint length followed by that many bytes
//! * `5` fixed32: 4 bytes little-endian
//!
//! Group wire types (3 and 4) are not supported.

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use bytes::BufMut;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::TranscodeError;
use crate::metadata::TypeKind;

/// Largest field number protobuf allows.
pub const MAX_TAG: u32 = (1 << 29) - 1;

const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl WireType {
    pub fn from_key(key: u64) -> Result<WireType, TranscodeError> {
        let raw = (key & 0x7) as u8;
        match FromPrimitive::from_u8(raw) {
            Some(WireType::StartGroup) | Some(WireType::EndGroup) | None => {
                Err(TranscodeError::InvalidWireType(raw))
            }
            Some(wt) => Ok(wt),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

pub fn make_key(tag: u32, wire: WireType) -> u64 {
    (u64::from(tag) << 3) | u64::from(wire.code())
}

#[inline]
pub fn encode_zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub fn decode_zigzag(x: u64) -> i64 {
    ((x >> 1) as i64) ^ -((x & 1) as i64)
}

#[inline]
pub fn decode_zigzag32(x: u64) -> i32 {
    let x = x as u32;
    ((x >> 1) as i32) ^ -((x & 1) as i32)
}

pub fn varint_len(mut x: u64) -> usize {
    let mut n = 1;
    while x >= 0x80 {
        x >>= 7;
        n += 1;
    }
    n
}

pub fn encode_varint<B: BufMut>(buf: &mut B, mut x: u64) {
    while x >= 0x80 {
        buf.put_u8((x as u8 & 0x7f) | 0x80);
        x >>= 7;
    }
    buf.put_u8(x as u8);
}

pub fn encode_key<B: BufMut>(buf: &mut B, tag: u32, wire: WireType) {
    encode_varint(buf, make_key(tag, wire));
}

/// Writes a numeric value in the raw layout of `wire`, without a key.
pub fn encode_raw<B: BufMut>(buf: &mut B, wire: WireType, x: u64) {
    match wire {
        WireType::Fixed32 => buf.put_u32_le(x as u32),
        WireType::Fixed64 => buf.put_u64_le(x),
        _ => encode_varint(buf, x),
    }
}

/// Writes a complete length-delimited entry: key, length, payload.
pub fn encode_bytes<B: BufMut>(buf: &mut B, tag: u32, data: &[u8]) {
    encode_key(buf, tag, WireType::LengthDelimited);
    encode_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Parses the decimal text of a numeric kind into its raw wire value.
/// Signed 32-bit kinds are sign extended, `sint` kinds are zigzag encoded
/// and floats are stored as their IEEE 754 bits.
pub fn parse_scalar(kind: TypeKind, text: &str) -> Result<(WireType, u64), TranscodeError> {
    let x = match kind {
        TypeKind::Int32 | TypeKind::Enum => i64::from(parse::<i32>(text)?) as u64,
        TypeKind::Int64 | TypeKind::Sfixed64 => parse::<i64>(text)? as u64,
        TypeKind::Uint32 | TypeKind::Fixed32 => u64::from(parse::<u32>(text)?),
        TypeKind::Uint64 | TypeKind::Fixed64 => parse::<u64>(text)?,
        TypeKind::Sint32 => encode_zigzag(i64::from(parse::<i32>(text)?)),
        TypeKind::Sint64 => encode_zigzag(parse::<i64>(text)?),
        TypeKind::Sfixed32 => u64::from(parse::<i32>(text)? as u32),
        TypeKind::Float => u64::from(parse_float(text)?.to_bits()),
        TypeKind::Double => parse_double(text)?.to_bits(),
        TypeKind::Bool
        | TypeKind::String
        | TypeKind::Bytes
        | TypeKind::Message
        | TypeKind::Map => {
            return Err(TranscodeError::invalid_value(
                text,
                format!("{} is not numeric", kind),
            ))
        }
    };
    Ok((kind.wire_type(), x))
}

fn parse<T>(text: &str) -> Result<T, TranscodeError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    text.parse::<T>()
        .map_err(|e| TranscodeError::invalid_value(text, e.to_string()))
}

fn parse_double(text: &str) -> Result<f64, TranscodeError> {
    match text {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => parse::<f64>(text),
    }
}

fn parse_float(text: &str) -> Result<f32, TranscodeError> {
    match text {
        "NaN" => Ok(f32::NAN),
        "Infinity" => Ok(f32::INFINITY),
        "-Infinity" => Ok(f32::NEG_INFINITY),
        _ => {
            // Parsed directly as f32; going through f64 rounds twice.
            let x = parse::<f32>(text)?;
            if x.is_infinite() {
                return Err(TranscodeError::invalid_value(text, "value out of range"));
            }
            Ok(x)
        }
    }
}

/// A decoded wire value. Length-delimited payloads borrow from the input
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireValue<'a> {
    Scalar(u64),
    Bytes(&'a [u8]),
}

impl<'a> WireValue<'a> {
    pub fn scalar(&self) -> u64 {
        match self {
            WireValue::Scalar(x) => *x,
            WireValue::Bytes(_) => 0,
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        match self {
            WireValue::Bytes(b) => *b,
            WireValue::Scalar(_) => &[],
        }
    }
}

/// Forward-only cursor over a wire record.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> WireReader<'a> {
        WireReader { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn decode_varint(&mut self) -> Result<u64, TranscodeError> {
        let mut x: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let b = match self.buf.get(self.pos + i) {
                Some(b) => *b,
                None => return Err(TranscodeError::Truncated),
            };
            x |= u64::from(b & 0x7f) << (7 * i);
            if b < 0x80 {
                if i == MAX_VARINT_LEN - 1 && b > 1 {
                    return Err(TranscodeError::VarintOverflow);
                }
                self.pos += i + 1;
                return Ok(x);
            }
        }
        Err(TranscodeError::VarintOverflow)
    }

    pub fn decode_fixed32(&mut self) -> Result<u64, TranscodeError> {
        let raw = self.take(4)?;
        Ok(u64::from(LittleEndian::read_u32(raw)))
    }

    pub fn decode_fixed64(&mut self) -> Result<u64, TranscodeError> {
        let raw = self.take(8)?;
        Ok(LittleEndian::read_u64(raw))
    }

    pub fn decode_bytes(&mut self) -> Result<&'a [u8], TranscodeError> {
        let len = self.decode_varint()?;
        if len > self.remaining() as u64 {
            return Err(TranscodeError::Truncated);
        }
        self.take(len as usize)
    }

    /// Reads the next key. Running out of input, including in the middle of
    /// a key, ends the record and yields `None`.
    pub fn decode_key(&mut self) -> Result<Option<(u32, WireType)>, TranscodeError> {
        if self.is_empty() {
            return Ok(None);
        }
        let key = match self.decode_varint() {
            Ok(key) => key,
            Err(TranscodeError::Truncated) => {
                self.pos = self.buf.len();
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let wire = WireType::from_key(key)?;
        let tag = key >> 3;
        if tag == 0 || tag > u64::from(MAX_TAG) {
            return Err(TranscodeError::InvalidTag(tag));
        }
        Ok(Some((tag as u32, wire)))
    }

    pub fn decode_value(&mut self, wire: WireType) -> Result<WireValue<'a>, TranscodeError> {
        match wire {
            WireType::Varint => self.decode_varint().map(WireValue::Scalar),
            WireType::Fixed64 => self.decode_fixed64().map(WireValue::Scalar),
            WireType::Fixed32 => self.decode_fixed32().map(WireValue::Scalar),
            WireType::LengthDelimited => self.decode_bytes().map(WireValue::Bytes),
            WireType::StartGroup | WireType::EndGroup => {
                Err(TranscodeError::InvalidWireType(wire.code()))
            }
        }
    }

    /// Reads one raw value of a packed run.
    pub fn decode_packed(&mut self, wire: WireType) -> Result<u64, TranscodeError> {
        match wire {
            WireType::Fixed32 => self.decode_fixed32(),
            WireType::Fixed64 => self.decode_fixed64(),
            _ => self.decode_varint(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TranscodeError> {
        if self.remaining() < n {
            return Err(TranscodeError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use quickcheck::quickcheck;

    #[test]
    fn varint_known_values() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xac, 0x02]);

        buf.clear();
        encode_varint(&mut buf, (-1i64) as u64);
        assert_eq!(buf.len(), 10);
        assert_eq!(buf[9], 0x01);
        assert_eq!(varint_len((-1i64) as u64), 10);
    }

    #[test]
    fn zigzag_known_values() {
        assert_eq!(encode_zigzag(0), 0);
        assert_eq!(encode_zigzag(-1), 1);
        assert_eq!(encode_zigzag(1), 2);
        assert_eq!(encode_zigzag(-2), 3);
        assert_eq!(encode_zigzag(i64::min_value()), u64::max_value());
        assert_eq!(decode_zigzag32(encode_zigzag(-32)), -32);
    }

    #[test]
    fn key_truncation_ends_record() {
        // A lone continuation byte is an incomplete key.
        let mut r = WireReader::new(&[0x80]);
        assert_eq!(r.decode_key().unwrap(), None);
        assert!(r.is_empty());
    }

    #[test]
    fn truncated_values_are_errors() {
        let mut r = WireReader::new(&[0x0a, 0x05, b'a']);
        let (tag, wire) = r.decode_key().unwrap().unwrap();
        assert_eq!((tag, wire), (1, WireType::LengthDelimited));
        assert_eq!(r.decode_value(wire), Err(TranscodeError::Truncated));

        let mut r = WireReader::new(&[0x0d, 0x01, 0x02]);
        let (_, wire) = r.decode_key().unwrap().unwrap();
        assert_eq!(r.decode_value(wire), Err(TranscodeError::Truncated));
    }

    #[test]
    fn rejects_groups_and_tag_zero() {
        let mut r = WireReader::new(&[0x0b]);
        assert_eq!(r.decode_key(), Err(TranscodeError::InvalidWireType(3)));

        let mut r = WireReader::new(&[0x00, 0x01]);
        assert_eq!(r.decode_key(), Err(TranscodeError::InvalidTag(0)));
    }

    #[test]
    fn varint_overflow() {
        let data = [0xff; 11];
        let mut r = WireReader::new(&data);
        assert_eq!(r.decode_varint(), Err(TranscodeError::VarintOverflow));
    }

    #[test]
    fn parse_scalar_kinds() {
        assert_eq!(
            parse_scalar(TypeKind::Int32, "-1").unwrap(),
            (WireType::Varint, u64::max_value())
        );
        assert_eq!(
            parse_scalar(TypeKind::Sint32, "-1").unwrap(),
            (WireType::Varint, 1)
        );
        assert_eq!(
            parse_scalar(TypeKind::Sfixed32, "-1").unwrap(),
            (WireType::Fixed32, 0xffff_ffff)
        );
        assert_eq!(
            parse_scalar(TypeKind::Float, "1.5").unwrap(),
            (WireType::Fixed32, u64::from(1.5f32.to_bits()))
        );
        assert_eq!(
            parse_scalar(TypeKind::Double, "-Infinity").unwrap(),
            (WireType::Fixed64, f64::NEG_INFINITY.to_bits())
        );
        assert!(parse_scalar(TypeKind::Int32, "2147483648").is_err());
        assert!(parse_scalar(TypeKind::Uint64, "-1").is_err());
        assert!(parse_scalar(TypeKind::Int64, "1.0").is_err());
        assert!(parse_scalar(TypeKind::Float, "1e39").is_err());
        assert!(parse_scalar(TypeKind::String, "1").is_err());
    }

    quickcheck! {
        fn prop_varint_roundtrip(x: u64) -> bool {
            let mut buf = Vec::new();
            encode_varint(&mut buf, x);
            let mut r = WireReader::new(&buf);
            buf.len() == varint_len(x) && r.decode_varint() == Ok(x) && r.is_empty()
        }

        fn prop_zigzag_roundtrip(n: i64) -> bool {
            decode_zigzag(encode_zigzag(n)) == n
        }

        fn prop_zigzag32_roundtrip(n: i32) -> bool {
            decode_zigzag32(encode_zigzag(i64::from(n))) == n
        }

        fn prop_fixed_roundtrip(a: u32, b: u64) -> bool {
            let mut buf = Vec::new();
            encode_raw(&mut buf, WireType::Fixed32, u64::from(a));
            encode_raw(&mut buf, WireType::Fixed64, b);
            let mut r = WireReader::new(&buf);
            r.decode_fixed32() == Ok(u64::from(a)) && r.decode_fixed64() == Ok(b)
        }
    }
}
