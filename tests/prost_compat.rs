// Copyright 2020 Joyent, Inc.

//! Checks the converters against messages encoded and decoded by prost.

use std::collections::BTreeMap;

use std::time::Duration;

use prost::Message;
use slog::{o, Logger};

use fast_transcode::handler::{CallHandler, HttpViewHandler, RequestParts};
use fast_transcode::metadata::{
    Call, FieldDef, MessageDef, Schema, SchemaBuilder, TypeKind,
};
use fast_transcode::{jtop, pbjson};

#[derive(Clone, PartialEq, prost::Message)]
pub struct Inner {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub note: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Sample {
    #[prost(int32, tag = "1")]
    pub i32v: i32,
    #[prost(int64, tag = "2")]
    pub i64v: i64,
    #[prost(uint32, tag = "3")]
    pub u32v: u32,
    #[prost(uint64, tag = "4")]
    pub u64v: u64,
    #[prost(sint32, tag = "5")]
    pub s32v: i32,
    #[prost(sint64, tag = "6")]
    pub s64v: i64,
    #[prost(fixed32, tag = "7")]
    pub fx32: u32,
    #[prost(fixed64, tag = "8")]
    pub fx64: u64,
    #[prost(sfixed32, tag = "9")]
    pub sfx32: i32,
    #[prost(sfixed64, tag = "10")]
    pub sfx64: i64,
    #[prost(bool, tag = "11")]
    pub flag: bool,
    #[prost(float, tag = "12")]
    pub ratio: f32,
    #[prost(double, tag = "13")]
    pub score: f64,
    #[prost(string, tag = "14")]
    pub name: String,
    #[prost(bytes = "vec", tag = "15")]
    pub blob: Vec<u8>,
    // enums travel as int32
    #[prost(int32, tag = "16")]
    pub kind: i32,
    #[prost(message, optional, tag = "17")]
    pub inner: Option<Inner>,
    #[prost(int32, repeated, tag = "18")]
    pub nums: Vec<i32>,
    #[prost(string, repeated, tag = "19")]
    pub tags: Vec<String>,
    #[prost(message, repeated, tag = "20")]
    pub items: Vec<Inner>,
    #[prost(btree_map = "string, int64", tag = "21")]
    pub labels: BTreeMap<String, i64>,
    #[prost(btree_map = "uint32, message", tag = "22")]
    pub by_id: BTreeMap<u32, Inner>,
    #[prost(double, repeated, tag = "23")]
    pub weights: Vec<f64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HttpRequest {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(string, tag = "2")]
    pub query: String,
    #[prost(btree_map = "string, string", tag = "3")]
    pub headers: BTreeMap<String, String>,
    #[prost(bytes = "vec", tag = "4")]
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HttpResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(btree_map = "string, string", tag = "2")]
    pub headers: BTreeMap<String, String>,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
}

fn schema() -> Schema {
    let mut b = SchemaBuilder::new();
    b.add(MessageDef::new(
        "Inner",
        vec![
            FieldDef::new(1, "id", TypeKind::Int64),
            FieldDef::new(2, "note", TypeKind::String),
        ],
    ))
    .add(
        MessageDef::new(
            "Sample.LabelsEntry",
            vec![
                FieldDef::new(1, "key", TypeKind::String),
                FieldDef::new(2, "value", TypeKind::Int64),
            ],
        )
        .map_entry(),
    )
    .add(
        MessageDef::new(
            "Sample.ByIdEntry",
            vec![
                FieldDef::new(1, "key", TypeKind::Uint32),
                FieldDef::message(2, "value", "Inner"),
            ],
        )
        .map_entry(),
    )
    .add(MessageDef::new(
        "Sample",
        vec![
            FieldDef::new(1, "i32v", TypeKind::Int32),
            FieldDef::new(2, "i64v", TypeKind::Int64),
            FieldDef::new(3, "u32v", TypeKind::Uint32),
            FieldDef::new(4, "u64v", TypeKind::Uint64),
            FieldDef::new(5, "s32v", TypeKind::Sint32),
            FieldDef::new(6, "s64v", TypeKind::Sint64),
            FieldDef::new(7, "fx32", TypeKind::Fixed32),
            FieldDef::new(8, "fx64", TypeKind::Fixed64),
            FieldDef::new(9, "sfx32", TypeKind::Sfixed32),
            FieldDef::new(10, "sfx64", TypeKind::Sfixed64),
            FieldDef::new(11, "flag", TypeKind::Bool),
            FieldDef::new(12, "ratio", TypeKind::Float),
            FieldDef::new(13, "score", TypeKind::Double),
            FieldDef::new(14, "name", TypeKind::String),
            FieldDef::new(15, "blob", TypeKind::Bytes),
            FieldDef::new(16, "kind", TypeKind::Enum),
            FieldDef::message(17, "inner", "Inner"),
            FieldDef::new(18, "nums", TypeKind::Int32).repeated(),
            FieldDef::new(19, "tags", TypeKind::String).repeated(),
            FieldDef::message(20, "items", "Inner").repeated(),
            FieldDef::message(21, "labels", "Sample.LabelsEntry").repeated(),
            FieldDef::message(22, "by_id", "Sample.ByIdEntry").repeated(),
            FieldDef::new(23, "weights", TypeKind::Double).repeated(),
        ],
    ));
    b.build().unwrap()
}

fn inner(id: i64, note: &str) -> Inner {
    Inner {
        id,
        note: note.to_string(),
    }
}

fn sample() -> Sample {
    let mut labels = BTreeMap::new();
    labels.insert("a".to_string(), -1);
    labels.insert("b".to_string(), 300);
    let mut by_id = BTreeMap::new();
    by_id.insert(7, inner(70, "seven"));
    Sample {
        i32v: -1,
        i64v: -5_000_000_000,
        u32v: 4_000_000_000,
        u64v: u64::max_value(),
        s32v: -64,
        s64v: -3,
        fx32: 0xdead_beef,
        fx64: 1 << 40,
        sfx32: -2,
        sfx64: -(1 << 40),
        flag: true,
        ratio: 1.5,
        score: -2.25,
        name: "caf\u{e9} \"q\"\n".to_string(),
        blob: vec![0, 1, 2, 255],
        kind: 2,
        inner: Some(inner(1, "x")),
        nums: vec![1, -2, 300],
        tags: vec!["p".to_string(), "".to_string(), "q".to_string()],
        items: vec![inner(2, "y"), inner(3, "")],
        labels,
        by_id,
        weights: vec![0.5, -2.0],
    }
}

const SAMPLE_JSON: &str = r#"{
    "i32v": -1,
    "i64v": -5000000000,
    "u32v": 4000000000,
    "u64v": 18446744073709551615,
    "s32v": -64,
    "s64v": -3,
    "fx32": 3735928559,
    "fx64": 1099511627776,
    "sfx32": -2,
    "sfx64": -1099511627776,
    "flag": true,
    "ratio": 1.5,
    "score": -2.25,
    "name": "café \"q\"\n",
    "blob": "AAEC/w==",
    "kind": 2,
    "inner": {"id": 1, "note": "x"},
    "nums": [1, -2, 300],
    "tags": ["p", "", "q"],
    "items": [{"id": 2, "note": "y"}, {"id": 3}],
    "labels": {"a": -1, "b": 300},
    "by_id": {"7": {"id": 70, "note": "seven"}},
    "weights": [0.5, -2.0]
}"#;

#[test]
fn json_encoding_matches_prost() {
    let schema = schema();
    let msg = schema.message_by_name("Sample").unwrap();
    let wire = jtop::encode(&schema, msg, SAMPLE_JSON.as_bytes()).unwrap();
    assert_eq!(wire, sample().encode_to_vec());
}

#[test]
fn member_order_does_not_matter_to_prost() {
    let schema = schema();
    let msg = schema.message_by_name("Sample").unwrap();
    let json = r#"{"by_id": {"7": {"note": "seven", "id": 70}},
        "unknown": {"deep": [1, {"x": null}]},
        "name": "n", "nums": [4], "i32v": 9, "inner": {"note": "z"}}"#;
    let wire = jtop::encode(&schema, msg, json.as_bytes()).unwrap();
    let decoded = Sample::decode(&wire[..]).unwrap();

    let mut expected = Sample::default();
    expected.by_id.insert(7, inner(70, "seven"));
    expected.name = "n".to_string();
    expected.nums = vec![4];
    expected.i32v = 9;
    expected.inner = Some(inner(0, "z"));
    assert_eq!(decoded, expected);
}

#[test]
fn prost_records_survive_json() {
    let schema = schema();
    let msg = schema.message_by_name("Sample").unwrap();
    let original = sample();
    let wire = original.encode_to_vec();

    let standard = pbjson::encode(&schema, msg, &wire).unwrap();
    let fast = pbjson::encode_fast(&schema, msg, &wire).unwrap();
    assert_eq!(standard, fast);

    let value: serde_json::Value = serde_json::from_slice(&standard).unwrap();
    assert_eq!(value["blob"], "AAEC/w==");
    assert_eq!(value["labels"]["b"], 300);
    assert_eq!(value["by_id"]["7"]["note"], "seven");
    assert_eq!(value["items"][1]["note"], "");

    let again = jtop::encode(&schema, msg, &standard).unwrap();
    assert_eq!(Sample::decode(&again[..]).unwrap(), original);
}

#[test]
fn empty_prost_record_lists_every_field() {
    let schema = schema();
    let msg = schema.message_by_name("Sample").unwrap();
    let json = pbjson::encode(&schema, msg, &Sample::default().encode_to_vec()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    let obj = value.as_object().unwrap();
    assert_eq!(obj.len(), 23);
    assert_eq!(value["inner"], serde_json::json!({}));
    assert_eq!(value["tags"], serde_json::json!([]));
    assert_eq!(value["labels"], serde_json::json!({}));
    assert_eq!(value["flag"], false);
    assert_eq!(value["name"], "");
}

#[test]
fn view_handler_speaks_prost() {
    let schema = schema();
    let log = Logger::root(slog::Discard, o!());
    let call = Call {
        server: "pages".to_string(),
        handler: "httpview".to_string(),
        name: "/demo.Pages/Render".to_string(),
        input: schema.lookup("Sample").unwrap(),
        output: schema.lookup("Sample").unwrap(),
        timeout: Duration::from_secs(1),
    };

    let req = RequestParts::new()
        .with_body("application/x-www-form-urlencoded", "q=1")
        .with_raw_query("page=2")
        .header("Accept", "text/html")
        .header("Cookie", "");
    let wire = HttpViewHandler
        .handle_request(&schema, &call, &req, &log)
        .unwrap();
    let decoded = HttpRequest::decode(&wire[..]).unwrap();
    assert_eq!(decoded.method, "/demo.Pages/Render");
    assert_eq!(decoded.query, "page=2");
    assert_eq!(decoded.headers.len(), 2);
    assert_eq!(decoded.headers["accept"], "text/html");
    assert_eq!(decoded.headers["cookie"], "");
    assert_eq!(decoded.body, b"q=1".to_vec());

    let mut reply = HttpResponse {
        status: 404,
        body: b"not here".to_vec(),
        ..HttpResponse::default()
    };
    reply
        .headers
        .insert("Content-Type".to_string(), "text/plain".to_string());
    let resp = HttpViewHandler
        .write_response(&schema, &call, &reply.encode_to_vec(), &log)
        .unwrap();
    assert_eq!(resp.status, 404);
    assert_eq!(
        resp.headers,
        vec![("Content-Type".to_string(), "text/plain".to_string())]
    );
    assert_eq!(resp.body, b"not here".to_vec());
}
