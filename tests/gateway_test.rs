// Copyright 2020 Joyent, Inc.

use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use serde_json::{json, Value};
use slog::{debug, info, o, Drain, Level, LevelFilter, Logger};

use fast_transcode::handler::{
    HttpJsonHandler, HttpJsonOptions, HttpViewHandler, PassthroughHandler,
    RequestParts,
};
use fast_transcode::metadata::{Call, Schema};
use fast_transcode::wire;
use fast_transcode::{jtop, pbjson, Gateway, SchemaStore, TranscodeError};

const DOC: &str = r#"{
    "package": "demo",
    "messages": [
        {"name": "demo.GetItem", "fields": [
            {"tag": 1, "name": "id", "kind": "int64", "bind": "params", "validate": true},
            {"tag": 2, "name": "token", "kind": "string", "bind": "header"}
        ]},
        {"name": "demo.CreateItem", "fields": [
            {"tag": 1, "name": "name", "kind": "string"},
            {"tag": 2, "name": "tags", "kind": "string", "repeated": true},
            {"tag": 3, "name": "owner", "kind": "string", "bind": "context"}
        ]},
        {"name": "demo.Paging", "flat": true, "fields": [
            {"tag": 1, "name": "page", "kind": "int32"},
            {"tag": 2, "name": "total", "kind": "int32"}
        ]},
        {"name": "demo.Item", "fields": [
            {"tag": 1, "name": "id", "kind": "int64"},
            {"tag": 2, "name": "name", "kind": "string"},
            {"tag": 3, "name": "payload", "kind": "bytes", "raw_data": true, "omit_empty": true},
            {"tag": 4, "name": "paging", "kind": "message", "type": "demo.Paging"}
        ]}
    ],
    "services": [
        {"name": "Items", "default_handler": "httpjson", "default_timeout": 1000,
         "path_prefix": "/v1",
         "methods": [
            {"name": "Get", "input": "demo.GetItem", "output": "demo.Item",
             "http": {"get": "/items/:id"}, "use": ["auth"]},
            {"name": "Create", "input": "demo.CreateItem", "output": "demo.Item",
             "http": {"post": "/items"}},
            {"name": "Upload", "input": "demo.CreateItem", "output": "demo.Item",
             "http": {"put": "/blobs"}, "handler": "raw"},
            {"name": "Page", "input": "demo.CreateItem", "output": "demo.Item",
             "http": {"get": "/pages/:name"}, "handler": "view"}
         ]}
    ]
}"#;

fn root_log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            Level::Info,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}

fn gateway(log: &Logger) -> (Arc<SchemaStore>, Arc<Gateway>) {
    let store = Arc::new(SchemaStore::new(Some(log)));
    let gw = Arc::new(Gateway::new(Some(log)));
    gw.register_handler(
        "httpjson",
        HttpJsonHandler::new(HttpJsonOptions {
            fast_output: true,
            pool_capacity: 4,
        }),
    );
    gw.register_handler("raw", PassthroughHandler);
    gw.register_handler("view", HttpViewHandler);
    gw.register_middleware("auth");
    gw.follow(&store).unwrap();
    store.sync_document("items", DOC.as_bytes()).unwrap();
    (store, gw)
}

/// Stands in for the backend: reads the request record as JSON and answers
/// with an item record.
fn backend(schema: &Schema, call: &Call, request: &[u8], log: &Logger) -> Vec<u8> {
    let input = schema.message(call.input);
    let json = pbjson::encode(schema, input, request).unwrap();
    let req: Value = serde_json::from_slice(&json).unwrap();
    debug!(log, "backend request"; "call" => &call.name, "body" => req.to_string());

    let id = req.get("id").and_then(Value::as_i64).unwrap_or(7);
    let name = req
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("widget")
        .to_string();
    let reply = json!({"id": id, "name": name, "paging": {"page": 1, "total": 3}});
    let output = schema.message(call.output);
    let mut wire = jtop::encode(schema, output, reply.to_string().as_bytes()).unwrap();
    wire::encode_bytes(&mut wire, 3, br#"{"k":[1,2]}"#);
    wire
}

#[test]
fn get_item_end_to_end() {
    let log = root_log();
    let (store, gw) = gateway(&log);

    let req = RequestParts::new().param("id", "42").header("Token", "abc");
    let wire = gw.encode_request("GET", "/v1/items/:id", &req).unwrap();
    assert_eq!(wire, vec![0x08, 0x2a, 0x12, 0x03, b'a', b'b', b'c']);

    let call = gw.call("GET", "/v1/items/:id").unwrap();
    assert_eq!(call.name, "/demo.Items/Get");
    assert_eq!(gw.middlewares("GET", "/v1/items/:id").unwrap(), vec!["auth"]);

    let reply = backend(&store.current().schema, &call, &wire, &log);
    let resp = gw.decode_response("GET", "/v1/items/:id", &reply).unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.content_type, "application/json");
    assert_eq!(
        String::from_utf8(resp.body).unwrap(),
        r#"{"id":42,"name":"widget","payload":{"k":[1,2]},"page":1,"total":3}"#
    );
}

#[test]
fn create_item_merges_body_and_context() {
    let log = root_log();
    let (store, gw) = gateway(&log);

    let req = RequestParts::json(r#"{"name": "n", "tags": ["a", "b"]}"#)
        .context("owner", "");
    let wire = gw.encode_request("POST", "/v1/items", &req).unwrap();
    assert_eq!(
        wire,
        vec![0x0a, 0x01, b'n', 0x12, 0x01, b'a', 0x12, 0x01, b'b', 0x1a, 0x00]
    );

    let call = gw.call("POST", "/v1/items").unwrap();
    let reply = backend(&store.current().schema, &call, &wire, &log);
    let resp = gw.decode_response("POST", "/v1/items", &reply).unwrap();
    let body: Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["name"], "n");
    assert_eq!(body["id"], 7);
}

#[test]
fn passthrough_route() {
    let log = root_log();
    let (_store, gw) = gateway(&log);
    let req = RequestParts::new().with_body("application/x-protobuf", vec![0x0a, 0x00]);
    assert_eq!(
        gw.encode_request("PUT", "/v1/blobs", &req).unwrap(),
        vec![0x0a, 0x00]
    );
    let resp = gw.decode_response("PUT", "/v1/blobs", &[0xff]).unwrap();
    assert_eq!(resp.body, vec![0xff]);
}

#[test]
fn view_route() {
    let log = root_log();
    let (_store, gw) = gateway(&log);
    let req = RequestParts::new()
        .with_raw_query("lang=en")
        .header("Accept", "text/html");
    let wire = gw.encode_request("GET", "/v1/pages/:name", &req).unwrap();

    let mut expected = Vec::new();
    wire::encode_bytes(&mut expected, 1, b"/demo.Items/Page");
    wire::encode_bytes(&mut expected, 2, b"lang=en");
    let mut entry = Vec::new();
    wire::encode_bytes(&mut entry, 1, b"accept");
    wire::encode_bytes(&mut entry, 2, b"text/html");
    wire::encode_bytes(&mut expected, 3, &entry);
    assert_eq!(wire, expected);

    let mut reply = vec![0x08, 0xac, 0x02]; // status 300
    wire::encode_bytes(&mut reply, 3, b"<html/>");
    let resp = gw.decode_response("GET", "/v1/pages/:name", &reply).unwrap();
    assert_eq!(resp.status, 300);
    assert!(resp.headers.is_empty());
    assert_eq!(resp.body, b"<html/>".to_vec());
}

#[test]
fn request_errors_map_to_statuses() {
    let log = root_log();
    let (_store, gw) = gateway(&log);

    let missing = gw
        .encode_request("GET", "/v1/items/:id", &RequestParts::new())
        .unwrap_err();
    assert_eq!(
        missing,
        TranscodeError::MissingRequiredParameter {
            message: "demo.GetItem".to_string(),
            field: "id".to_string(),
        }
    );
    let resp = gw.error_response(&missing);
    assert_eq!(resp.status, 400);
    let body: Value = serde_json::from_slice(&resp.body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("id"));

    let bad = gw
        .encode_request("POST", "/v1/items", &RequestParts::json(r#"{"tags": 1}"#))
        .unwrap_err();
    assert_eq!(bad.status(), 400);

    let truncated = gw
        .decode_response("POST", "/v1/items", &[0x12, 0x05, b'a'])
        .unwrap_err();
    assert_eq!(truncated.status(), 502);

    let unrouted = gw
        .encode_request("DELETE", "/v1/items", &RequestParts::new())
        .unwrap_err();
    assert_eq!(gw.error_response(&unrouted).status, 404);
}

#[test]
fn bad_update_keeps_routes() {
    let log = root_log();
    let (store, gw) = gateway(&log);

    let unknown = DOC.replace(r#""use": ["auth"]"#, r#""use": ["auth", "audit"]"#);
    store.sync_document("items", unknown.as_bytes()).unwrap();
    // the store moved on, the gateway kept its table
    assert_eq!(store.current().routes.len(), 4);
    assert_eq!(gw.middlewares("GET", "/v1/items/:id").unwrap(), vec!["auth"]);

    gw.register_middleware("audit");
    store.sync_document("items", unknown.as_bytes()).unwrap();
    assert_eq!(
        gw.middlewares("GET", "/v1/items/:id").unwrap(),
        vec!["auth", "audit"]
    );
}

#[test]
fn requests_during_reloads() {
    let log = root_log();
    let (store, gw) = gateway(&log);
    let (tx, rx) = mpsc::channel();
    let barrier = Arc::new(Barrier::new(5));

    let mut workers = Vec::new();
    for n in 0..4 {
        let gw = Arc::clone(&gw);
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();
        workers.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..200 {
                let req = RequestParts::new().param("id", (n * 1000 + i).to_string());
                let wire = gw.encode_request("GET", "/v1/items/:id", &req).unwrap();
                tx.send(wire).unwrap();
            }
        }));
    }
    drop(tx);

    barrier.wait();
    for i in 0..20 {
        let prefix = if i % 2 == 0 { "/v1" } else { "/v1/" };
        let doc = DOC.replace(r#""/v1""#, &format!("\"{}\"", prefix));
        store.sync_document("items", doc.as_bytes()).unwrap();
    }
    for w in workers {
        w.join().unwrap();
    }

    let received = rx.iter().count();
    info!(log, "requests encoded during reloads"; "count" => received);
    assert_eq!(received, 800);
}
