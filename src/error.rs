// Copyright 2020 Joyent, Inc.

use std::error::Error as StdError;
use std::fmt;
use std::io::{Error, ErrorKind};

use crate::metadata::TypeKind;

/// The single error type returned by every transcoding and routing
/// operation in this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeError {
    /// The JSON or key/value value shape is incompatible with the declared
    /// field kind.
    TypeMismatch { found: &'static str, kind: TypeKind },
    /// A literal could not be parsed for the declared kind.
    InvalidValue { value: String, reason: String },
    /// The top level JSON input is not of the required shape.
    InvalidInput(String),
    /// The JSON input ended before a structural token was seen.
    UnexpectedEof,
    /// The wire type on the wire disagrees with the field's wire type.
    WireTypeMismatch { tag: u32, expected: u8, actual: u8 },
    /// A key/value binding marked `validate` was not present.
    MissingRequiredParameter { message: String, field: String },
    UnknownHandler(String),
    UnknownMiddleware(String),
    UnknownRoute { method: String, path: String },
    /// A wire value runs past the end of its buffer.
    Truncated,
    VarintOverflow,
    /// Wire types 3, 4, 6 and 7 are never accepted.
    InvalidWireType(u8),
    InvalidTag(u64),
    InvalidMapEntry(String),
    /// A backend reply decoded but does not describe a valid response.
    InvalidReply(String),
    InvalidSchema(String),
}

impl TranscodeError {
    pub fn invalid_value<V, R>(value: V, reason: R) -> TranscodeError
    where
        V: Into<String>,
        R: Into<String>,
    {
        TranscodeError::InvalidValue {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_schema<S: Into<String>>(msg: S) -> TranscodeError {
        TranscodeError::InvalidSchema(msg.into())
    }

    /// The HTTP status a gateway should answer with when this error aborts
    /// a request.
    pub fn status(&self) -> u16 {
        match self {
            TranscodeError::TypeMismatch { .. }
            | TranscodeError::InvalidValue { .. }
            | TranscodeError::InvalidInput(_)
            | TranscodeError::UnexpectedEof
            | TranscodeError::MissingRequiredParameter { .. } => 400,
            TranscodeError::UnknownRoute { .. } => 404,
            TranscodeError::UnknownHandler(_)
            | TranscodeError::UnknownMiddleware(_)
            | TranscodeError::InvalidSchema(_) => 500,
            // Wire decoding only ever runs on backend replies.
            TranscodeError::WireTypeMismatch { .. }
            | TranscodeError::Truncated
            | TranscodeError::VarintOverflow
            | TranscodeError::InvalidWireType(_)
            | TranscodeError::InvalidTag(_)
            | TranscodeError::InvalidMapEntry(_)
            | TranscodeError::InvalidReply(_) => 502,
        }
    }
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TranscodeError::TypeMismatch { found, kind } => write!(
                f,
                "type mismatch: json type ({}) and protobuf kind ({})",
                found, kind
            ),
            TranscodeError::InvalidValue { value, reason } => {
                if reason.is_empty() {
                    write!(f, "invalid input value: [{}]", value)
                } else {
                    write!(f, "invalid input value: [{}]: {}", value, reason)
                }
            }
            TranscodeError::InvalidInput(msg) => {
                write!(f, "invalid json input: {}", msg)
            }
            TranscodeError::UnexpectedEof => {
                write!(f, "invalid json format: unexpected end of input")
            }
            TranscodeError::WireTypeMismatch {
                tag,
                expected,
                actual,
            } => write!(
                f,
                "field {}: expect wire type {}, got {}",
                tag, expected, actual
            ),
            TranscodeError::MissingRequiredParameter { message, field } => {
                write!(f, "{}: must provide param: {}", message, field)
            }
            TranscodeError::UnknownHandler(name) => {
                write!(f, "no such handler: {}", name)
            }
            TranscodeError::UnknownMiddleware(name) => {
                write!(f, "no such middleware: {}", name)
            }
            TranscodeError::UnknownRoute { method, path } => {
                write!(f, "no route for {} {}", method, path)
            }
            TranscodeError::Truncated => {
                write!(f, "wire value runs past end of buffer")
            }
            TranscodeError::VarintOverflow => {
                write!(f, "varint longer than 10 bytes")
            }
            TranscodeError::InvalidWireType(wt) => {
                write!(f, "unexpected wire type: {}", wt)
            }
            TranscodeError::InvalidTag(tag) => {
                write!(f, "invalid field tag: {}", tag)
            }
            TranscodeError::InvalidMapEntry(msg) => {
                write!(f, "invalid map entry: {}", msg)
            }
            TranscodeError::InvalidReply(msg) => {
                write!(f, "invalid reply: {}", msg)
            }
            TranscodeError::InvalidSchema(msg) => {
                write!(f, "invalid metadata: {}", msg)
            }
        }
    }
}

impl StdError for TranscodeError {}

impl From<TranscodeError> for Error {
    fn from(err: TranscodeError) -> Self {
        Error::new(ErrorKind::Other, err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(TranscodeError::UnexpectedEof.status(), 400);
        assert_eq!(
            TranscodeError::UnknownRoute {
                method: String::from("GET"),
                path: String::from("/x"),
            }
            .status(),
            404
        );
        assert_eq!(TranscodeError::Truncated.status(), 502);
        assert_eq!(TranscodeError::invalid_schema("dup").status(), 500);
    }

    #[test]
    fn into_io_error() {
        let err: Error = TranscodeError::UnknownHandler(String::from("x")).into();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.to_string(), "no such handler: x");
    }
}
