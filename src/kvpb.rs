// Copyright 2020 Joyent, Inc.

//! Key/value parameters to protobuf wire encoder.
//!
//! Each top level field of the message is looked up by name in the request
//! channel its `bind` option names. Only numeric, boolean, string and bytes
//! fields can be bound; values found for other fields are ignored.
//!
//! A missing parameter is skipped unless the field is marked `validate`.
//! A parameter that does not parse for its field kind is dropped the same
//! way, again unless the field is marked `validate`.

use std::borrow::Cow;

use crate::error::TranscodeError;
use crate::metadata::{BindSource, Field, Message, TypeKind};
use crate::wire::{self, WireType};

/// The five request channels a field can be bound from.
pub trait KvSource {
    fn get_form(&self, key: &str) -> Option<Cow<str>>;
    fn get_context(&self, key: &str) -> Option<Cow<str>>;
    fn get_query(&self, key: &str) -> Option<Cow<str>>;
    fn get_header(&self, key: &str) -> Option<Cow<str>>;
    fn get_params(&self, key: &str) -> Option<Cow<str>>;

    fn lookup(&self, source: BindSource, key: &str) -> Option<Cow<str>> {
        match source {
            BindSource::Default => self.get_form(key),
            BindSource::Context => self.get_context(key),
            BindSource::Query => self.get_query(key),
            BindSource::Header => self.get_header(key),
            BindSource::Params => self.get_params(key),
        }
    }
}

pub fn encode<K: KvSource + ?Sized>(msg: &Message, kv: &K) -> Result<Vec<u8>, TranscodeError> {
    let mut out = Vec::new();
    encode_into(msg, kv, &mut out)?;
    Ok(out)
}

/// Appends the bound fields to `out`. On error `out` is left as it was.
pub fn encode_into<K: KvSource + ?Sized>(
    msg: &Message,
    kv: &K,
    out: &mut Vec<u8>,
) -> Result<(), TranscodeError> {
    let start = out.len();
    for field in msg.fields() {
        let value = match kv.lookup(field.options.bind, &field.name) {
            Some(value) => value,
            None if field.options.validate => {
                out.truncate(start);
                return Err(TranscodeError::MissingRequiredParameter {
                    message: msg.name().to_string(),
                    field: field.name.clone(),
                });
            }
            None => continue,
        };
        if !bindable(field) {
            continue;
        }
        match encode_field(field, &value, out) {
            Ok(()) => (),
            Err(e) if field.options.validate => {
                out.truncate(start);
                return Err(e);
            }
            Err(_) => (),
        }
    }
    Ok(())
}

fn bindable(field: &Field) -> bool {
    !field.repeated && field.kind != TypeKind::Message && field.kind != TypeKind::Map
}

fn encode_field(field: &Field, value: &str, out: &mut Vec<u8>) -> Result<(), TranscodeError> {
    match field.kind {
        TypeKind::String | TypeKind::Bytes => {
            wire::encode_bytes(out, field.tag, value.as_bytes());
        }
        TypeKind::Bool => {
            let x = parse_bool(value)?;
            wire::encode_key(out, field.tag, WireType::Varint);
            wire::encode_varint(out, x as u64);
        }
        kind => {
            let (wire, x) = wire::parse_scalar(kind, value)?;
            wire::encode_key(out, field.tag, wire);
            wire::encode_raw(out, wire, x);
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool, TranscodeError> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(TranscodeError::invalid_value(value, "invalid bool")),
    }
}
