// Copyright 2020 Joyent, Inc.

//! Schema documents.
//!
//! A schema document is the JSON description of a set of message types and
//! the services exposed over HTTP, as produced by the schema compiler:
//!
//! ```json
//! {
//!   "package": "demo",
//!   "messages": [
//!     {"name": "demo.HelloRequest", "fields": [
//!       {"tag": 1, "name": "name", "kind": "string"},
//!       {"tag": 2, "name": "token", "kind": "string", "bind": "header"}
//!     ]},
//!     {"name": "demo.HelloReply", "fields": [
//!       {"tag": 1, "name": "message", "kind": "string"}
//!     ]}
//!   ],
//!   "services": [
//!     {"name": "Greeter", "default_handler": "httpjson",
//!      "default_timeout": 3000, "path_prefix": "/api",
//!      "methods": [
//!        {"name": "SayHello", "input": "demo.HelloRequest",
//!         "output": "demo.HelloReply", "http": {"post": "/hello"},
//!         "use": ["auth"]}
//!      ]}
//!   ]
//! }
//! ```
//!
//! [`Document::into_metadata`] bakes the messages into a [`Schema`] and turns
//! every method with an `http` binding into a [`Route`].
//!
//! [`Schema`]: crate::metadata::Schema

use std::sync::Arc;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::error::TranscodeError;
use crate::metadata::{Call, MessageDef, Metadata, Route, RouteOptions, SchemaBuilder};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub messages: Vec<MessageDef>,
    #[serde(default)]
    pub services: Vec<ServiceDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    pub name: String,
    /// Backend to dial; the service's full name when absent.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub default_handler: String,
    /// Milliseconds.
    #[serde(default)]
    pub default_timeout: u64,
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub input: String,
    pub output: String,
    /// Methods without an HTTP binding are not routed.
    #[serde(default)]
    pub http: Option<HttpRule>,
    #[serde(default)]
    pub handler: Option<String>,
    /// Milliseconds; 0 keeps the service default.
    #[serde(default)]
    pub timeout: u64,
    /// Middleware names, in the order they run.
    #[serde(default, rename = "use")]
    pub middlewares: Vec<String>,
}

/// HTTP verb and path of a method, written as `{"post": "/path"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpRule {
    Get(String),
    Post(String),
    Put(String),
    Delete(String),
    Patch(String),
    Options(String),
}

impl HttpRule {
    pub fn method(&self) -> &'static str {
        match self {
            HttpRule::Get(_) => "GET",
            HttpRule::Post(_) => "POST",
            HttpRule::Put(_) => "PUT",
            HttpRule::Delete(_) => "DELETE",
            HttpRule::Patch(_) => "PATCH",
            HttpRule::Options(_) => "OPTIONS",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            HttpRule::Get(p)
            | HttpRule::Post(p)
            | HttpRule::Put(p)
            | HttpRule::Delete(p)
            | HttpRule::Patch(p)
            | HttpRule::Options(p) => p,
        }
    }
}

pub fn parse_document(data: &[u8]) -> Result<Metadata, TranscodeError> {
    let doc: Document = serde_json::from_slice(data)
        .map_err(|e| TranscodeError::invalid_schema(e.to_string()))?;
    doc.into_metadata()
}

impl Document {
    pub fn into_metadata(self) -> Result<Metadata, TranscodeError> {
        let mut builder = SchemaBuilder::new();
        for def in self.messages {
            builder.add(def);
        }
        let schema = builder.build()?;

        let mut routes = Vec::new();
        for svc in self.services.iter() {
            let full_name = if self.package.is_empty() {
                svc.name.clone()
            } else {
                format!("{}.{}", self.package, svc.name)
            };
            let prefix = service_prefix(&svc.path_prefix)?;

            for method in svc.methods.iter() {
                let rule = match method.http {
                    Some(ref rule) => rule,
                    None => continue,
                };
                let path = rule.path();
                if path.is_empty() {
                    return Err(TranscodeError::invalid_schema(format!(
                        "missing route path of method {}",
                        method.name
                    )));
                }
                if !path.starts_with('/') {
                    return Err(TranscodeError::invalid_schema(format!(
                        "path {} must start with '/'",
                        path
                    )));
                }
                let resolve = |name: &str| {
                    schema.lookup(name).ok_or_else(|| {
                        TranscodeError::invalid_schema(format!(
                            "{}.{}: unknown message type {}",
                            full_name, method.name, name
                        ))
                    })
                };
                let timeout = if method.timeout != 0 {
                    method.timeout
                } else {
                    svc.default_timeout
                };

                let call = Call {
                    server: svc.server.clone().unwrap_or_else(|| full_name.clone()),
                    handler: method
                        .handler
                        .clone()
                        .unwrap_or_else(|| svc.default_handler.clone()),
                    name: format!("/{}/{}", full_name, method.name),
                    input: resolve(&method.input)?,
                    output: resolve(&method.output)?,
                    timeout: Duration::from_millis(timeout),
                };
                routes.push(Route {
                    method: rule.method().to_string(),
                    path: format!("{}{}", prefix, path),
                    options: RouteOptions {
                        middlewares: method.middlewares.clone(),
                    },
                    call: Arc::new(call),
                });
            }
        }

        Ok(Metadata { schema, routes })
    }
}

fn service_prefix(prefix: &str) -> Result<&str, TranscodeError> {
    if prefix.is_empty() {
        return Ok(prefix);
    }
    if !prefix.starts_with('/') {
        return Err(TranscodeError::invalid_schema(format!(
            "prefix {} must start with '/'",
            prefix
        )));
    }
    Ok(prefix.trim_end_matches('/'))
}
