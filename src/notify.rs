//! The Notification Manager: a single-writer broadcaster of cluster-view
//! events to subscribed listeners.
//!
//! Built the same way the teacher's Pub/Sub fan-out and `EventBus` are: one
//! task owns the listener registry and drains its own mailbox, so
//! `addListener`'s "deliver the current view before returning" guarantee
//! and `publish`'s "every listener sees events in the same order" guarantee
//! both fall out of ordinary single-consumer message ordering rather than
//! needing a lock.

use crate::node::ClusterView;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A unique handle for a registered listener, returned by `add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The events fanned out to every subscriber.
#[derive(Debug, Clone)]
pub enum Event {
    Connected(ClusterView),
    Disconnected,
    NodesChanged(ClusterView),
    Shutdown,
}

enum Control {
    AddListener(mpsc::UnboundedSender<Event>, oneshot::Sender<ListenerId>),
    RemoveListener(ListenerId),
    Publish(Event),
}

struct Listener {
    id: ListenerId,
    sender: mpsc::UnboundedSender<Event>,
}

struct NotificationManager {
    listeners: Vec<Listener>,
    next_id: u64,
    /// The most recently published connected view, or `None` if the
    /// cluster is not currently known to be connected. Used to answer
    /// `add_listener`'s "if a view is currently known" rule.
    current_view: Option<ClusterView>,
    shutdown: bool,
}

impl NotificationManager {
    fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
            current_view: None,
            shutdown: false,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Control>) {
        while let Some(control) = mailbox.recv().await {
            match control {
                Control::AddListener(sender, reply) => {
                    let id = ListenerId(self.next_id);
                    self.next_id += 1;
                    if let Some(view) = &self.current_view {
                        // Best-effort: if the listener's own channel is
                        // already gone there's nothing useful to do; it
                        // will simply never receive anything.
                        let _ = sender.send(Event::Connected(view.clone()));
                    }
                    self.listeners.push(Listener { id, sender });
                    let _ = reply.send(id);
                }
                Control::RemoveListener(id) => {
                    self.listeners.retain(|l| l.id != id);
                }
                Control::Publish(event) => {
                    if self.shutdown {
                        debug!("ignoring publish after shutdown");
                        continue;
                    }
                    match &event {
                        Event::Connected(view) | Event::NodesChanged(view) => {
                            self.current_view = Some(view.clone());
                        }
                        Event::Disconnected => {
                            self.current_view = None;
                        }
                        Event::Shutdown => {
                            self.shutdown = true;
                        }
                    }
                    for listener in &self.listeners {
                        // A listener whose receiver has been dropped just
                        // misses future events; it does not block or
                        // abort delivery to the rest.
                        let _ = listener.sender.send(event.clone());
                    }
                }
            }
        }
    }
}

/// A cheaply cloneable handle to a running Notification Manager task.
#[derive(Clone)]
pub struct NotificationManagerHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl NotificationManagerHandle {
    /// Spawns the Notification Manager's task and returns a handle to it.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(NotificationManager::new().run(rx));
        Self { tx }
    }

    /// Registers a new listener and returns its id and event receiver. If a
    /// view is currently known, a `Connected` snapshot is delivered to the
    /// receiver before this call resolves.
    pub async fn add_listener(&self) -> (ListenerId, mpsc::UnboundedReceiver<Event>) {
        let (etx, erx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        // If the manager task is gone, the caller just gets a channel that
        // will never receive anything; there is no meaningful error to
        // report through this API.
        let _ = self.tx.send(Control::AddListener(etx, reply_tx));
        let id = reply_rx.await.unwrap_or(ListenerId(u64::MAX));
        (id, erx)
    }

    /// Unregisters a listener. Idempotent: removing an unknown or
    /// already-removed id is a no-op.
    pub fn remove_listener(&self, id: ListenerId) {
        let _ = self.tx.send(Control::RemoveListener(id));
    }

    /// Publishes an event to every currently registered listener, in
    /// registration order. Ignored once `Shutdown` has been published.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(Control::Publish(event));
    }
}
