// Copyright 2020 Joyent, Inc.

//! Hot-reloadable schema store.
//!
//! The store holds the current [`Metadata`] behind an `Arc`. Readers take a
//! clone of the `Arc` and keep using that graph for as long as they need
//! it; [`SchemaStore::replace`] swaps in a new graph without touching the
//! old one, so a reader sees either the old graph or the new one in full.
//!
//! Subscribers are called synchronously, in registration order, after every
//! swap. A subscriber must not call back into `replace` or `sync_service`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use slog::{debug, info, o, Drain, Logger};

use crate::document;
use crate::error::TranscodeError;
use crate::metadata::Metadata;

type Subscriber = Box<dyn Fn(&Arc<Metadata>) + Send + Sync>;

pub struct SchemaStore {
    current: RwLock<Arc<Metadata>>,
    /// Metadata synced per service name, merged on every sync.
    services: Mutex<BTreeMap<String, Metadata>>,
    subscribers: Mutex<Vec<Subscriber>>,
    log: Logger,
}

impl SchemaStore {
    pub fn new(log: Option<&Logger>) -> SchemaStore {
        let log = log.cloned().unwrap_or_else(|| {
            Logger::root(slog_stdlog::StdLog.fuse(), o!())
        });
        SchemaStore {
            current: RwLock::new(Arc::new(Metadata::default())),
            services: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            log,
        }
    }

    /// The graph in effect now.
    pub fn current(&self) -> Arc<Metadata> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&Arc<Metadata>) + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(Box::new(f));
    }

    /// Calls `first` with the current graph and registers `f` for every
    /// later one. Both happen under the subscriber lock, so `f` never sees a
    /// graph older than the one `first` got.
    pub fn subscribe_current<T, G, F>(&self, first: G, f: F) -> T
    where
        G: FnOnce(&Arc<Metadata>) -> T,
        F: Fn(&Arc<Metadata>) + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let result = first(&self.current());
        subs.push(Box::new(f));
        result
    }

    /// Installs `metadata` as the current graph and notifies subscribers.
    pub fn replace(&self, metadata: Metadata) -> Arc<Metadata> {
        // Held across swap and notification: subscribers see replacements
        // in swap order.
        let subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(metadata);
        {
            let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
            *guard = Arc::clone(&next);
        }
        info!(self.log, "schema replaced";
            "messages" => next.schema.len(),
            "routes" => next.routes.len());

        for sub in subs.iter() {
            sub(&next);
        }
        next
    }

    /// Records the metadata of one service and installs the merge of all
    /// services synced so far.
    pub fn sync_service(&self, name: &str, metadata: Metadata) -> Arc<Metadata> {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services.insert(name.to_string(), metadata);
        debug!(self.log, "service synced"; "service" => name, "services" => services.len());
        let merged = Metadata::merge(services.values());
        self.replace(merged)
    }

    /// Parses a schema document and syncs it as service `name`.
    pub fn sync_document(&self, name: &str, data: &[u8]) -> Result<Arc<Metadata>, TranscodeError> {
        let metadata = document::parse_document(data).map_err(|e| {
            info!(self.log, "rejected schema document"; "service" => name, "err" => %e);
            e
        })?;
        Ok(self.sync_service(name, metadata))
    }
}
