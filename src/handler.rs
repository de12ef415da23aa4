// Copyright 2020 Joyent, Inc.

//! Call handlers: the per-route glue between an HTTP request and the wire
//! record sent to the backend, and between the backend reply and the HTTP
//! response.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde_derive::{Deserialize, Serialize};
use slog::{trace, Logger};

use crate::error::TranscodeError;
use crate::jtop;
use crate::kvpb::{self, KvSource};
use crate::metadata::{Call, Schema};
use crate::pbjson;
use crate::pool::{Pool, DEFAULT_POOL_CAPACITY};
use crate::wire::{self, WireReader, WireType};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// An inbound request, already read into memory.
///
/// Header names are matched case-insensitively. Empty values are treated as
/// absent on every channel except the context.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    pub content_type: String,
    pub body: Vec<u8>,
    /// The query string as it came, without the `?`.
    pub raw_query: String,
    form: HashMap<String, String>,
    context: HashMap<String, String>,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    params: HashMap<String, String>,
}

impl RequestParts {
    pub fn new() -> RequestParts {
        RequestParts::default()
    }

    /// A request carrying a JSON body.
    pub fn json<B: Into<Vec<u8>>>(body: B) -> RequestParts {
        RequestParts {
            content_type: CONTENT_TYPE_JSON.to_string(),
            body: body.into(),
            ..RequestParts::default()
        }
    }

    pub fn with_body<S, B>(mut self, content_type: S, body: B) -> Self
    where
        S: Into<String>,
        B: Into<Vec<u8>>,
    {
        self.content_type = content_type.into();
        self.body = body.into();
        self
    }

    pub fn with_raw_query<S: Into<String>>(mut self, raw_query: S) -> Self {
        self.raw_query = raw_query.into();
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.form.insert(key.into(), value.into());
        self
    }

    pub fn context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Every header, names lowercased, sorted by name.
    pub fn headers(&self) -> Vec<(&str, &str)> {
        let mut headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        headers.sort();
        headers
    }

    /// Whether the body is JSON, ignoring media type parameters.
    pub fn is_json(&self) -> bool {
        let media = self.content_type.split(';').next().unwrap_or("");
        media.trim().eq_ignore_ascii_case(CONTENT_TYPE_JSON)
    }
}

fn non_empty<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<Cow<'a, str>> {
    match map.get(key) {
        Some(v) if !v.is_empty() => Some(Cow::Borrowed(v.as_str())),
        _ => None,
    }
}

impl KvSource for RequestParts {
    fn get_form(&self, key: &str) -> Option<Cow<str>> {
        non_empty(&self.form, key)
    }

    fn get_context(&self, key: &str) -> Option<Cow<str>> {
        self.context.get(key).map(|v| Cow::Borrowed(v.as_str()))
    }

    fn get_query(&self, key: &str) -> Option<Cow<str>> {
        non_empty(&self.query, key)
    }

    fn get_header(&self, key: &str) -> Option<Cow<str>> {
        non_empty(&self.headers, &key.to_ascii_lowercase())
    }

    fn get_params(&self, key: &str) -> Option<Cow<str>> {
        non_empty(&self.params, key)
    }
}

/// An outbound response. Entries in `headers` are set after
/// `content_type` and may replace it.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: &'static str, body: Vec<u8>) -> Response {
        Response::new(200, content_type, body)
    }

    pub fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Response {
        Response {
            status,
            content_type,
            headers: Vec::new(),
            body,
        }
    }
}

/// Converts requests into wire records for a call's input message, and
/// wire replies into responses for its output message.
pub trait CallHandler: Send + Sync {
    fn handle_request(
        &self,
        schema: &Schema,
        call: &Call,
        request: &RequestParts,
        log: &Logger,
    ) -> Result<Vec<u8>, TranscodeError>;

    fn write_response(
        &self,
        schema: &Schema,
        call: &Call,
        reply: &[u8],
        log: &Logger,
    ) -> Result<Response, TranscodeError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpJsonOptions {
    /// Use the single-pass wire to JSON conversion for replies.
    pub fast_output: bool,
    /// Encoders built up front per pool, and the most each pool keeps
    /// idle. Busy periods build extra encoders that are dropped after use.
    pub pool_capacity: usize,
}

impl Default for HttpJsonOptions {
    fn default() -> Self {
        HttpJsonOptions {
            fast_output: false,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// JSON over HTTP. The request message is built from the JSON body, when
/// there is one, followed by the fields bound from the other request
/// channels; the reply is written as a JSON object.
pub struct HttpJsonHandler {
    options: HttpJsonOptions,
    input: Pool<jtop::Encoder>,
    output: Pool<pbjson::Encoder>,
}

impl HttpJsonHandler {
    pub fn new(options: HttpJsonOptions) -> HttpJsonHandler {
        HttpJsonHandler {
            input: Pool::new(options.pool_capacity),
            output: Pool::new(options.pool_capacity),
            options,
        }
    }

    pub fn options(&self) -> &HttpJsonOptions {
        &self.options
    }
}

impl Default for HttpJsonHandler {
    fn default() -> Self {
        HttpJsonHandler::new(HttpJsonOptions::default())
    }
}

impl CallHandler for HttpJsonHandler {
    fn handle_request(
        &self,
        schema: &Schema,
        call: &Call,
        request: &RequestParts,
        log: &Logger,
    ) -> Result<Vec<u8>, TranscodeError> {
        let msg = schema.message(call.input);
        let mut wire = if request.is_json() {
            let mut enc = self.input.acquire();
            enc.encode(schema, msg, &request.body)?
        } else {
            Vec::new()
        };
        kvpb::encode_into(msg, request, &mut wire)?;
        trace!(log, "encoded request"; "call" => &call.name, "len" => wire.len());
        Ok(wire)
    }

    fn write_response(
        &self,
        schema: &Schema,
        call: &Call,
        reply: &[u8],
        log: &Logger,
    ) -> Result<Response, TranscodeError> {
        let msg = schema.message(call.output);
        let mut enc = self.output.acquire();
        if self.options.fast_output {
            enc.encode_fast(schema, msg, reply)?;
        } else {
            enc.encode(schema, msg, reply)?;
        }
        trace!(log, "decoded reply"; "call" => &call.name, "len" => reply.len());
        Ok(Response::ok(CONTENT_TYPE_JSON, enc.bytes().to_vec()))
    }
}

/// Forwards request bodies and replies unchanged.
#[derive(Debug, Clone, Default)]
pub struct PassthroughHandler;

impl CallHandler for PassthroughHandler {
    fn handle_request(
        &self,
        _schema: &Schema,
        _call: &Call,
        request: &RequestParts,
        _log: &Logger,
    ) -> Result<Vec<u8>, TranscodeError> {
        Ok(request.body.clone())
    }

    fn write_response(
        &self,
        _schema: &Schema,
        _call: &Call,
        reply: &[u8],
        _log: &Logger,
    ) -> Result<Response, TranscodeError> {
        Ok(Response::ok(CONTENT_TYPE_OCTET_STREAM, reply.to_vec()))
    }
}

const VIEW_METHOD: u32 = 1;
const VIEW_QUERY: u32 = 2;
const VIEW_REQUEST_HEADERS: u32 = 3;
const VIEW_REQUEST_BODY: u32 = 4;

const VIEW_STATUS: u32 = 1;
const VIEW_RESPONSE_HEADERS: u32 = 2;
const VIEW_RESPONSE_BODY: u32 = 3;

/// Hands the whole HTTP exchange to the backend.
///
/// The request is sent as an `HttpRequest` record, whatever the call's
/// input message says:
///
/// ```text
/// message HttpRequest {
///     string method = 1;               // the call name
///     string query = 2;                // raw query string
///     map<string, string> headers = 3; // lowercased names
///     bytes body = 4;
/// }
/// ```
///
/// and the reply is read as an `HttpResponse` record:
///
/// ```text
/// message HttpResponse {
///     int32 status = 1;                // 0 means 200
///     map<string, string> headers = 2;
///     bytes body = 3;
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpViewHandler;

impl CallHandler for HttpViewHandler {
    fn handle_request(
        &self,
        _schema: &Schema,
        call: &Call,
        request: &RequestParts,
        log: &Logger,
    ) -> Result<Vec<u8>, TranscodeError> {
        let mut out = Vec::with_capacity(request.body.len() + 64);
        wire::encode_bytes(&mut out, VIEW_METHOD, call.name.as_bytes());
        if !request.raw_query.is_empty() {
            wire::encode_bytes(&mut out, VIEW_QUERY, request.raw_query.as_bytes());
        }
        let mut entry = Vec::new();
        for (name, value) in request.headers() {
            entry.clear();
            wire::encode_bytes(&mut entry, 1, name.as_bytes());
            wire::encode_bytes(&mut entry, 2, value.as_bytes());
            wire::encode_bytes(&mut out, VIEW_REQUEST_HEADERS, &entry);
        }
        if !request.body.is_empty() {
            wire::encode_bytes(&mut out, VIEW_REQUEST_BODY, &request.body);
        }
        trace!(log, "wrapped request"; "call" => &call.name, "len" => out.len());
        Ok(out)
    }

    fn write_response(
        &self,
        _schema: &Schema,
        call: &Call,
        reply: &[u8],
        log: &Logger,
    ) -> Result<Response, TranscodeError> {
        let mut status = 0u64;
        let mut headers = BTreeMap::new();
        let mut body: &[u8] = &[];
        let mut r = WireReader::new(reply);
        while let Some((tag, wt)) = r.decode_key()? {
            let value = r.decode_value(wt)?;
            match (tag, wt) {
                (VIEW_STATUS, WireType::Varint) => status = value.scalar(),
                (VIEW_RESPONSE_HEADERS, WireType::LengthDelimited) => {
                    let (name, value) = header_entry(value.bytes())?;
                    headers.insert(name, value);
                }
                (VIEW_RESPONSE_BODY, WireType::LengthDelimited) => body = value.bytes(),
                (VIEW_STATUS, _) => {
                    return Err(view_mismatch(tag, WireType::Varint, wt))
                }
                (VIEW_RESPONSE_HEADERS, _) | (VIEW_RESPONSE_BODY, _) => {
                    return Err(view_mismatch(tag, WireType::LengthDelimited, wt))
                }
                _ => {}
            }
        }

        let status = match status as i32 {
            0 => 200,
            s @ 100..=999 => s as u16,
            s => {
                return Err(TranscodeError::InvalidReply(format!(
                    "status {}",
                    s
                )))
            }
        };
        trace!(log, "unwrapped reply";
            "call" => &call.name,
            "status" => status,
            "headers" => headers.len());
        let mut resp = Response::new(status, CONTENT_TYPE_OCTET_STREAM, body.to_vec());
        resp.headers = headers.into_iter().collect();
        Ok(resp)
    }
}

fn view_mismatch(tag: u32, expected: WireType, actual: WireType) -> TranscodeError {
    TranscodeError::WireTypeMismatch {
        tag,
        expected: expected.code(),
        actual: actual.code(),
    }
}

/// One `map<string, string>` entry. A missing key or value is empty.
fn header_entry(entry: &[u8]) -> Result<(String, String), TranscodeError> {
    let mut name: &[u8] = &[];
    let mut value: &[u8] = &[];
    let mut r = WireReader::new(entry);
    while let Some((tag, wt)) = r.decode_key()? {
        let v = r.decode_value(wt)?;
        match (tag, wt) {
            (1, WireType::LengthDelimited) => name = v.bytes(),
            (2, WireType::LengthDelimited) => value = v.bytes(),
            _ => {
                return Err(TranscodeError::InvalidMapEntry(format!(
                    "headers: wire type {} for tag {}",
                    wt.code(),
                    tag
                )))
            }
        }
    }
    Ok((
        String::from_utf8_lossy(name).into_owned(),
        String::from_utf8_lossy(value).into_owned(),
    ))
}
