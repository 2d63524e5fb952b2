//! `CoordinationStore` adapter over a real ZooKeeper session.
//!
//! Grounded on the `zookeeper` crate's blocking client, whose `ZooKeeper`
//! handle, `Watcher` trait, `WatchedEvent`, `ZkState`, `CreateMode`, and
//! `Acl` types map almost directly onto the coordination-store interface
//! this crate consumes (spec §6) — the same kind of "keep the teacher's
//! way of talking to the external system, swap the payload" adaptation as
//! `WardenClient` wrapping a RESP connection.

use crate::error::StoreError;
use crate::store::{CoordinationStore, CreateMode as OurCreateMode, RawEventSink, RawStoreEvent};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zookeeper::{Acl, CreateMode as ZkCreateMode, WatchedEvent, WatchedEventType, Watcher, ZkError, ZkState, ZooKeeper};

/// Bridges the `zookeeper` crate's single registered `Watcher` to our
/// `RawEventSink`. One of these is installed per session at `connect` time;
/// ZooKeeper delivers every session-state change and every re-armed
/// children-watch event it sees through this single callback.
struct SinkWatcher {
    sink: Arc<dyn RawEventSink>,
}

impl Watcher for SinkWatcher {
    fn handle(&self, event: WatchedEvent) {
        let raw = match event.keeper_state {
            ZkState::Connected | ZkState::ConnectedReadOnly => RawStoreEvent::SyncConnected,
            ZkState::Expired => RawStoreEvent::Expired,
            ZkState::Closed | ZkState::NotConnected | ZkState::Associating | ZkState::AuthFailed => {
                RawStoreEvent::Disconnected
            }
            _ => match event.event_type {
                WatchedEventType::NodeChildrenChanged => {
                    let Some(path) = event.path else {
                        debug!("dropping NodeChildrenChanged event with no path");
                        return;
                    };
                    RawStoreEvent::NodeChildrenChanged(path)
                }
                _ => RawStoreEvent::Other,
            },
        };
        self.sink.handle_raw_event(raw);
    }
}

/// Opens sessions against a fixed ZooKeeper connect string.
pub struct ZkStoreFactory {
    connect_string: String,
    session_timeout: Duration,
}

impl ZkStoreFactory {
    pub fn new(connect_string: impl Into<String>, session_timeout: Duration) -> Self {
        Self {
            connect_string: connect_string.into(),
            session_timeout,
        }
    }
}

impl crate::store::StoreFactory for ZkStoreFactory {
    fn connect(&self, sink: Arc<dyn RawEventSink>) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        let watcher = SinkWatcher { sink };
        let zk = ZooKeeper::connect(&self.connect_string, self.session_timeout, watcher)
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Arc::new(ZkStore { zk }))
    }
}

/// The live `CoordinationStore` backed by a connected ZooKeeper session.
pub struct ZkStore {
    zk: ZooKeeper,
}

fn map_zk_err(path: &str, err: ZkError) -> StoreError {
    match err {
        ZkError::NoNode => StoreError::NoNode(path.to_string()),
        ZkError::NodeExists => StoreError::NodeExists(path.to_string()),
        ZkError::SessionExpired => StoreError::SessionExpired,
        other => StoreError::Transport(other.to_string()),
    }
}

impl CoordinationStore for ZkStore {
    fn exists(&self, path: &str, watch: bool) -> Result<bool, StoreError> {
        self.zk
            .exists(path, watch)
            .map(|stat| stat.is_some())
            .map_err(|e| map_zk_err(path, e))
    }

    fn create(&self, path: &str, payload: Bytes, mode: OurCreateMode) -> Result<(), StoreError> {
        let zk_mode = match mode {
            OurCreateMode::Persistent => ZkCreateMode::Persistent,
            OurCreateMode::Ephemeral => ZkCreateMode::Ephemeral,
        };
        self.zk
            .create(path, payload.to_vec(), Acl::open_unsafe().clone(), zk_mode)
            .map(|_| ())
            .map_err(|e| map_zk_err(path, e))
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.zk.delete(path, -1).map_err(|e| map_zk_err(path, e))
    }

    fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>, StoreError> {
        self.zk
            .get_children(path, watch)
            .map_err(|e| map_zk_err(path, e))
    }

    fn get_data(&self, path: &str, watch: bool) -> Result<Bytes, StoreError> {
        self.zk
            .get_data(path, watch)
            .map(|(data, _stat)| Bytes::from(data))
            .map_err(|e| map_zk_err(path, e))
    }

    fn close(&self) {
        if let Err(e) = self.zk.close() {
            warn!("error closing coordination store session: {}", e);
        }
    }
}
