// Copyright 2020 Joyent, Inc.

//! Schema-driven transcoding for an HTTP to protobuf gateway.
//!
//! The gateway receives HTTP requests carrying JSON bodies and key/value
//! parameters, and calls backends that speak protobuf. This crate converts
//! between the two using a runtime [`Schema`](metadata::Schema) loaded from
//! a schema document, with no generated code:
//!
//! * [`jtop`] encodes a JSON object as a protobuf wire record.
//! * [`kvpb`] encodes form, query, header, path and context parameters as
//!   wire fields, bound per field.
//! * [`pbjson`] writes a wire record as a JSON object, in a standard and a
//!   single-pass fast variant with identical output.
//!
//! Around the converters sit the pieces a gateway needs to use them:
//!
//! * [`document`] parses schema documents into [`Metadata`](metadata::Metadata)
//!   (schema plus routes).
//! * [`store`] holds the current metadata and swaps in replacements while
//!   requests are in flight.
//! * [`handler`] defines call handlers (JSON, passthrough and whole-request
//!   views), and [`gateway`] binds routes to them.
//!
//! Wire format notes
//!
//! Records follow the protobuf encoding: every field is a varint key
//! `(tag << 3) | wire type` followed by a varint, a little-endian fixed32 or
//! fixed64, or a length-delimited payload. Repeated scalars are written
//! packed. Map fields are repeated entry messages with the key at tag 1 and
//! the value at tag 2. Decoding keeps the last value of a singular field,
//! accumulates repeated fields and skips unknown tags.

#![allow(missing_docs)]

pub mod document;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod jtop;
pub mod kvpb;
pub mod metadata;
pub mod pbjson;
pub mod pool;
pub mod store;
pub mod token;
pub mod wire;

pub use crate::error::TranscodeError;
pub use crate::gateway::Gateway;
pub use crate::metadata::{Metadata, Schema};
pub use crate::store::SchemaStore;
