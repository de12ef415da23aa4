// Copyright 2020 Joyent, Inc.

use std::fs;
use std::process;
use std::sync::Mutex;

use base64::Engine;
use clap::{crate_version, App, Arg, ArgMatches};
use slog::{debug, o, Drain, Level, LevelFilter, Logger};

use fast_transcode::store::SchemaStore;
use fast_transcode::{jtop, pbjson};

static APP: &'static str = "pbjsoncall";

pub fn parse_opts<'a, 'b>(app: String) -> ArgMatches<'a> {
    App::new(app)
        .about("Command-line tool for transcoding a message between JSON and protobuf wire format")
        .version(crate_version!())
        .arg(
            Arg::with_name("schema")
                .help("Path of the JSON schema document")
                .long("schema")
                .short("s")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("message")
                .help("Full name of the message type")
                .long("message")
                .short("m")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("json")
                .help("JSON object to encode; the wire record is printed as base64")
                .long("json")
                .takes_value(true)
                .conflicts_with("wire"),
        )
        .arg(
            Arg::with_name("wire")
                .help("Base64 wire record to decode; the JSON object is printed")
                .long("wire")
                .takes_value(true)
                .required_unless("json"),
        )
        .arg(
            Arg::with_name("fast")
                .help("Use the single-pass wire to JSON conversion")
                .long("fast")
                .short("f")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("verbose")
                .long("verbose")
                .short("v")
                .takes_value(false),
        )
        .get_matches()
}

fn fail<E: std::fmt::Display>(what: &str, e: E) -> ! {
    eprintln!("{}: {}", what, e);
    process::exit(1)
}

fn main() {
    let matches = parse_opts(APP.to_string());
    let level = if matches.is_present("verbose") {
        Level::Debug
    } else {
        Level::Warning
    };
    let plain = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let log = Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            level,
        ))
        .fuse(),
        o!("build-id" => crate_version!()),
    );

    let path = matches.value_of("schema").unwrap_or_default();
    let doc = fs::read(path)
        .unwrap_or_else(|e| fail("Failed to read schema document", e));
    let store = SchemaStore::new(Some(&log));
    let metadata = store
        .sync_document(path, &doc)
        .unwrap_or_else(|e| fail("Failed to load schema document", e));

    let name = matches.value_of("message").unwrap_or_default();
    let msg = metadata
        .schema
        .message_by_name(name)
        .unwrap_or_else(|| fail("Unknown message type", name));
    let engine = &base64::engine::general_purpose::STANDARD;

    if let Some(json) = matches.value_of("json") {
        let wire = jtop::encode(&metadata.schema, msg, json.as_bytes())
            .unwrap_or_else(|e| fail("Failed to encode", e));
        debug!(log, "encoded"; "message" => name, "len" => wire.len());
        println!("{}", engine.encode(&wire));
        return;
    }

    let text = matches.value_of("wire").unwrap_or_default();
    let wire = engine
        .decode(text.trim())
        .unwrap_or_else(|e| fail("Failed to parse wire record as base64", e));
    let result = if matches.is_present("fast") {
        pbjson::encode_fast(&metadata.schema, msg, &wire)
    } else {
        pbjson::encode(&metadata.schema, msg, &wire)
    };
    let json = result.unwrap_or_else(|e| fail("Failed to decode", e));
    debug!(log, "decoded"; "message" => name, "len" => wire.len());
    println!("{}", String::from_utf8_lossy(&json));
}
