//! An in-memory `CoordinationStore` test double.
//!
//! The teacher's own command-parsing tests build inputs directly against a
//! narrow trait rather than spinning up a real server; this does the same
//! thing for the coordination-store seam, so the manager's state machine can
//! be driven deterministically without a real ZooKeeper ensemble.
//!
//! Not gated behind `#[cfg(test)]` because `tests/scenarios.rs` (a separate
//! integration-test crate) needs to reach it too.

use crate::error::StoreError;
use crate::store::{CoordinationStore, CreateMode, RawEventSink, RawStoreEvent};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    /// path -> payload; presence of a key is existence of the znode.
    nodes: HashMap<String, Bytes>,
    ephemeral: HashSet<String>,
}

/// Shared backing store plus a handle tests use to simulate external
/// mutation (another process creating a node, an operator deleting one,
/// a session expiring) and to inject raw watcher events.
pub struct FakeCluster {
    inner: Arc<Mutex<Inner>>,
    sink: Arc<Mutex<Option<Arc<dyn RawEventSink>>>>,
    session_count: Arc<AtomicU32>,
    close_count: Arc<AtomicU32>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            sink: Arc::new(Mutex::new(None)),
            session_count: Arc::new(AtomicU32::new(0)),
            close_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn factory(&self) -> FakeStoreFactory {
        FakeStoreFactory {
            inner: self.inner.clone(),
            sink: self.sink.clone(),
            session_count: self.session_count.clone(),
            close_count: self.close_count.clone(),
        }
    }

    /// Directly inserts a persistent znode, bypassing `create`, to seed test
    /// fixtures (e.g. pre-existing members before a fresh connect).
    pub fn seed_persistent(&self, path: impl Into<String>, payload: Bytes) {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .insert(path.into(), payload);
    }

    pub fn seed_ephemeral(&self, path: impl Into<String>) {
        let path = path.into();
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(path.clone(), Bytes::new());
        inner.ephemeral.insert(path);
    }

    pub fn remove(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.remove(path);
        inner.ephemeral.remove(path);
    }

    /// Drops every ephemeral node, simulating what a real store does when a
    /// session expires.
    pub fn expire_ephemerals(&self) {
        let mut inner = self.inner.lock().unwrap();
        let gone: Vec<String> = inner.ephemeral.iter().cloned().collect();
        for path in gone {
            inner.nodes.remove(&path);
        }
        inner.ephemeral.clear();
    }

    /// Delivers a raw event to whatever sink is currently registered, as if
    /// the coordination-store client's watcher callback had fired.
    pub fn fire(&self, event: RawStoreEvent) {
        if let Some(sink) = self.sink.lock().unwrap().clone() {
            sink.handle_raw_event(event);
        }
    }

    /// How many times `connect` has been called against this cluster — used
    /// to assert that session expiry causes exactly one reconnect.
    pub fn session_count(&self) -> u32 {
        self.session_count.load(Ordering::SeqCst)
    }

    /// How many times `close` has been called on any session opened against
    /// this cluster — used to assert a store handle is closed exactly once.
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FakeStoreFactory {
    inner: Arc<Mutex<Inner>>,
    sink: Arc<Mutex<Option<Arc<dyn RawEventSink>>>>,
    session_count: Arc<AtomicU32>,
    close_count: Arc<AtomicU32>,
}

impl crate::store::StoreFactory for FakeStoreFactory {
    fn connect(&self, sink: Arc<dyn RawEventSink>) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        *self.sink.lock().unwrap() = Some(sink);
        self.session_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeStore {
            inner: self.inner.clone(),
            close_count: self.close_count.clone(),
        }))
    }
}

struct FakeStore {
    inner: Arc<Mutex<Inner>>,
    close_count: Arc<AtomicU32>,
}

impl CoordinationStore for FakeStore {
    fn exists(&self, path: &str, _watch: bool) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().nodes.contains_key(path))
    }

    fn create(&self, path: &str, payload: Bytes, mode: CreateMode) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nodes.contains_key(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }
        inner.nodes.insert(path.to_string(), payload);
        if mode == CreateMode::Ephemeral {
            inner.ephemeral.insert(path.to_string());
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nodes.remove(path).is_none() {
            return Err(StoreError::NoNode(path.to_string()));
        }
        inner.ephemeral.remove(path);
        Ok(())
    }

    fn get_children(&self, path: &str, _watch: bool) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        let prefix = format!("{path}/");
        let mut children: Vec<String> = inner
            .nodes
            .keys()
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                    .map(|rest| rest.to_string())
            })
            .collect();
        children.sort();
        Ok(children)
    }

    fn get_data(&self, path: &str, _watch: bool) -> Result<Bytes, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}
