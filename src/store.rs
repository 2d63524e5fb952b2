//! The coordination-store interface (spec §6) and its adapters.
//!
//! `CoordinationStore` is the only seam between the Cluster Manager and the
//! outside world. It is intentionally narrow and synchronous, mirroring the
//! blocking API shape of a real ZooKeeper client; the manager calls it via
//! `tokio::task::spawn_blocking` (see `manager`) rather than making the
//! trait itself `async`, since a session handle genuinely is a blocking
//! resource shared with a client library's own background I/O thread.

use crate::error::StoreError;
use bytes::Bytes;
use std::sync::Arc;

/// Whether a created znode disappears with the creating session or survives
/// process restarts (modulo explicit deletion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
}

/// The raw events a coordination-store client delivers to its watcher,
/// ahead of any translation into the Watcher Adapter's typed messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStoreEvent {
    SyncConnected,
    Disconnected,
    Expired,
    NodeChildrenChanged(String),
    /// Anything else the client surfaces (node created/deleted/data-changed
    /// events we don't watch for, or a session event we don't act on).
    Other,
}

/// Implemented by the Watcher Adapter; a `CoordinationStore` calls this from
/// whatever thread its own client library delivers watcher callbacks on.
pub trait RawEventSink: Send + Sync {
    fn handle_raw_event(&self, event: RawStoreEvent);
}

/// The narrow, synchronous interface to a coordination-store session.
///
/// One instance is owned exclusively by the Cluster Manager for the
/// lifetime of a session; `close` must be called exactly once.
pub trait CoordinationStore: Send + Sync {
    /// Returns whether `path` exists. If `watch` is set, the session's
    /// watcher is re-armed to fire a `NodeChildrenChanged`-shaped event
    /// (or be silently dropped, per the store's semantics) the next time
    /// `path` changes.
    fn exists(&self, path: &str, watch: bool) -> Result<bool, StoreError>;

    /// Creates `path` with `payload` under `mode`, using the store's
    /// permissive ACL. Fails with `StoreError::NodeExists` if it already
    /// exists.
    fn create(&self, path: &str, payload: Bytes, mode: CreateMode) -> Result<(), StoreError>;

    /// Deletes `path` regardless of its version (`version = -1`). Fails
    /// with `StoreError::NoNode` if it doesn't exist.
    fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Lists the children of `path`, optionally re-arming the watch.
    fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>, StoreError>;

    /// Fetches the payload at `path`, optionally re-arming the watch.
    fn get_data(&self, path: &str, watch: bool) -> Result<Bytes, StoreError>;

    /// Closes the session. Idempotent from the caller's point of view (the
    /// manager only ever calls it once per session, but implementations
    /// should tolerate being dropped afterward without panicking).
    fn close(&self);
}

/// Opens sessions against a configured coordination-store address. Passed
/// into the Cluster Manager explicitly (rather than reached for via global
/// state), per the "global store-client factory" design note.
pub trait StoreFactory: Send + Sync {
    fn connect(&self, sink: Arc<dyn RawEventSink>) -> Result<Arc<dyn CoordinationStore>, StoreError>;
}

pub mod zk;

pub mod fake;
