//! Translates raw coordination-store watcher callbacks into the Cluster
//! Manager's typed mailbox messages.
//!
//! Stateless, and safe to invoke from whatever foreign thread the
//! coordination-store client delivers watcher callbacks on: posting into an
//! unbounded `tokio::sync::mpsc` channel never blocks that thread, and a
//! post that fails only because the manager has already shut down is
//! logged and dropped rather than propagated, since the watch mechanism
//! that would have re-delivered it is gone along with the manager.

use crate::manager::{ManagerMessage, Notification};
use crate::store::{RawEventSink, RawStoreEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub struct WatcherAdapter {
    mailbox: UnboundedSender<ManagerMessage>,
}

impl WatcherAdapter {
    pub fn new(mailbox: UnboundedSender<ManagerMessage>) -> Self {
        Self { mailbox }
    }
}

impl RawEventSink for WatcherAdapter {
    fn handle_raw_event(&self, event: RawStoreEvent) {
        let notification = match event {
            RawStoreEvent::SyncConnected => Notification::Connected,
            RawStoreEvent::Disconnected => Notification::Disconnected,
            RawStoreEvent::Expired => Notification::Expired,
            RawStoreEvent::NodeChildrenChanged(path) => Notification::NodeChildrenChanged(path),
            RawStoreEvent::Other => {
                debug!("dropping unrecognized raw coordination-store event");
                return;
            }
        };

        if self
            .mailbox
            .send(ManagerMessage::Notification(notification))
            .is_err()
        {
            debug!("cluster manager mailbox is closed; dropping watcher event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerMessage;
    use tokio::sync::mpsc;

    #[test]
    fn translates_known_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let adapter = WatcherAdapter::new(tx);

        adapter.handle_raw_event(RawStoreEvent::SyncConnected);
        adapter.handle_raw_event(RawStoreEvent::NodeChildrenChanged("/r/members".into()));
        adapter.handle_raw_event(RawStoreEvent::Other);
        adapter.handle_raw_event(RawStoreEvent::Expired);

        match rx.try_recv().unwrap() {
            ManagerMessage::Notification(Notification::Connected) => {}
            other => panic!("unexpected message: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            ManagerMessage::Notification(Notification::NodeChildrenChanged(p)) => {
                assert_eq!(p, "/r/members")
            }
            other => panic!("unexpected message: {other:?}"),
        }
        // The `Other` event was dropped silently.
        match rx.try_recv().unwrap() {
            ManagerMessage::Notification(Notification::Expired) => {}
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn posting_after_mailbox_is_closed_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let adapter = WatcherAdapter::new(tx);
        adapter.handle_raw_event(RawStoreEvent::Disconnected);
    }
}
