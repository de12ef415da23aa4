// Copyright 2020 Joyent, Inc.

//! Route table tying HTTP routes to call handlers.
//!
//! Handlers and middlewares are registered by name. [`Gateway::update_routes`]
//! binds every route of a [`Metadata`] to its handler and checks its
//! middleware names, then swaps the whole table in at once; a failed update
//! leaves the previous table in place.
//!
//! Routes are looked up by HTTP method and the route path as declared in
//! the schema document. Matching request paths against route patterns and
//! running middlewares belong to the HTTP server in front of the gateway.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::json;
use slog::{debug, error, info, o, Drain, Logger};

use crate::error::TranscodeError;
use crate::handler::{CallHandler, RequestParts, Response, CONTENT_TYPE_JSON};
use crate::metadata::{Call, Metadata};
use crate::store::SchemaStore;

struct BoundRoute {
    call: Arc<Call>,
    handler: Arc<dyn CallHandler>,
    middlewares: Vec<String>,
}

#[derive(Default)]
struct RouteTable {
    metadata: Arc<Metadata>,
    routes: HashMap<(String, String), BoundRoute>,
}

pub struct Gateway {
    handlers: RwLock<HashMap<String, Arc<dyn CallHandler>>>,
    middlewares: RwLock<HashSet<String>>,
    table: RwLock<Arc<RouteTable>>,
    /// Serializes route updates.
    update: Mutex<()>,
    log: Logger,
}

impl Gateway {
    pub fn new(log: Option<&Logger>) -> Gateway {
        let log = log.cloned().unwrap_or_else(|| {
            Logger::root(slog_stdlog::StdLog.fuse(), o!())
        });
        Gateway {
            handlers: RwLock::new(HashMap::new()),
            middlewares: RwLock::new(HashSet::new()),
            table: RwLock::new(Arc::new(RouteTable::default())),
            update: Mutex::new(()),
            log,
        }
    }

    pub fn register_handler<H>(&self, name: &str, handler: H)
    where
        H: CallHandler + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(name.to_string(), Arc::new(handler));
    }

    pub fn register_middleware(&self, name: &str) {
        let mut mws = self.middlewares.write().unwrap_or_else(|e| e.into_inner());
        mws.insert(name.to_string());
    }

    /// Rebuilds the route table from `metadata`.
    pub fn update_routes(&self, metadata: Arc<Metadata>) -> Result<(), TranscodeError> {
        let _guard = self.update.lock().unwrap_or_else(|e| e.into_inner());
        let mut routes = HashMap::with_capacity(metadata.routes.len());
        {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            let mws = self.middlewares.read().unwrap_or_else(|e| e.into_inner());
            for route in metadata.routes.iter() {
                let handler = handlers
                    .get(&route.call.handler)
                    .ok_or_else(|| TranscodeError::UnknownHandler(route.call.handler.clone()))?;
                if let Some(name) = route
                    .options
                    .middlewares
                    .iter()
                    .find(|name| !mws.contains(name.as_str()))
                {
                    return Err(TranscodeError::UnknownMiddleware(name.clone()));
                }
                debug!(self.log, "bound route";
                    "method" => &route.method,
                    "path" => &route.path,
                    "call" => &route.call.name);
                routes.insert(
                    (route.method.clone(), route.path.clone()),
                    BoundRoute {
                        call: Arc::clone(&route.call),
                        handler: Arc::clone(handler),
                        middlewares: route.options.middlewares.clone(),
                    },
                );
            }
        }

        let count = routes.len();
        let table = Arc::new(RouteTable { metadata, routes });
        *self.table.write().unwrap_or_else(|e| e.into_inner()) = table;
        info!(self.log, "routes updated"; "routes" => count);
        Ok(())
    }

    /// Applies the store's current graph and follows every later
    /// replacement. Updates that fail are logged and the previous routes
    /// stay in effect.
    pub fn follow(self: &Arc<Self>, store: &SchemaStore) -> Result<(), TranscodeError> {
        let gw = Arc::clone(self);
        store.subscribe_current(
            |md| self.update_routes(Arc::clone(md)),
            move |md| {
                if let Err(e) = gw.update_routes(Arc::clone(md)) {
                    error!(gw.log, "failed to update routes"; "err" => %e);
                }
            },
        )
    }

    fn table(&self) -> Arc<RouteTable> {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// The call bound to a route.
    pub fn call(&self, method: &str, path: &str) -> Result<Arc<Call>, TranscodeError> {
        let table = self.table();
        let route = lookup(&table, method, path)?;
        Ok(Arc::clone(&route.call))
    }

    /// Middleware names of a route, in the order they run.
    pub fn middlewares(&self, method: &str, path: &str) -> Result<Vec<String>, TranscodeError> {
        let table = self.table();
        let route = lookup(&table, method, path)?;
        Ok(route.middlewares.clone())
    }

    /// Builds the wire record sent to the backend for a request.
    pub fn encode_request(
        &self,
        method: &str,
        path: &str,
        request: &RequestParts,
    ) -> Result<Vec<u8>, TranscodeError> {
        let table = self.table();
        let route = lookup(&table, method, path)?;
        route
            .handler
            .handle_request(&table.metadata.schema, &route.call, request, &self.log)
    }

    /// Builds the HTTP response for a backend reply.
    pub fn decode_response(
        &self,
        method: &str,
        path: &str,
        reply: &[u8],
    ) -> Result<Response, TranscodeError> {
        let table = self.table();
        let route = lookup(&table, method, path)?;
        route
            .handler
            .write_response(&table.metadata.schema, &route.call, reply, &self.log)
    }

    /// The response sent when a request fails.
    pub fn error_response(&self, err: &TranscodeError) -> Response {
        let status = err.status();
        if status >= 500 {
            error!(self.log, "request failed"; "err" => %err, "status" => status);
        } else {
            debug!(self.log, "request rejected"; "err" => %err, "status" => status);
        }
        let body = json!({ "error": err.to_string() }).to_string().into_bytes();
        Response::new(status, CONTENT_TYPE_JSON, body)
    }
}

fn lookup<'a>(
    table: &'a RouteTable,
    method: &str,
    path: &str,
) -> Result<&'a BoundRoute, TranscodeError> {
    table
        .routes
        .get(&(method.to_string(), path.to_string()))
        .ok_or_else(|| TranscodeError::UnknownRoute {
            method: method.to_string(),
            path: path.to_string(),
        })
}
