//! The Cluster Manager: the state machine at the heart of this crate.
//!
//! One task drains one mailbox — the "single logical thread of execution"
//! the concurrency model calls for — exactly like the teacher's
//! `MasterMonitor`, except here the mailbox itself provides the
//! serialization that `MasterMonitor` gets from locking a shared
//! `MasterState`. Blocking coordination-store calls are pushed onto
//! Tokio's blocking pool via `store_call` so a slow store round-trip never
//! stalls this task or the watcher adapter's non-blocking mailbox posts.

use crate::codec;
use crate::error::{MembershipError, StoreError};
use crate::node::{ClusterView, Node, empty_view};
use crate::notify::{Event, ListenerId, NotificationManagerHandle};
use crate::store::{CoordinationStore, CreateMode, RawEventSink, StoreFactory};
use crate::watcher::WatcherAdapter;
use crate::{metrics, store};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Fire-and-forget notifications the Watcher Adapter (or, for `Shutdown`, an
/// external caller) posts into the manager's mailbox.
pub enum Notification {
    Connected,
    Disconnected,
    Expired,
    NodeChildrenChanged(String),
    Shutdown,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::Connected => write!(f, "Connected"),
            Notification::Disconnected => write!(f, "Disconnected"),
            Notification::Expired => write!(f, "Expired"),
            Notification::NodeChildrenChanged(p) => write!(f, "NodeChildrenChanged({p})"),
            Notification::Shutdown => write!(f, "Shutdown"),
        }
    }
}

type Reply = oneshot::Sender<Result<(), MembershipError>>;

/// Synchronous request-reply mutation commands.
pub enum Command {
    AddNode(Node, Reply),
    RemoveNode(i32, Reply),
    MarkNodeAvailable(i32, Reply),
    MarkNodeUnavailable(i32, Reply),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::AddNode(n, _) => write!(f, "AddNode({})", n.id()),
            Command::RemoveNode(id, _) => write!(f, "RemoveNode({id})"),
            Command::MarkNodeAvailable(id, _) => write!(f, "MarkNodeAvailable({id})"),
            Command::MarkNodeUnavailable(id, _) => write!(f, "MarkNodeUnavailable({id})"),
        }
    }
}

/// Everything that can land in the Cluster Manager's single mailbox.
#[derive(Debug)]
pub enum ManagerMessage {
    Notification(Notification),
    Command(Command),
}

/// Runs a blocking `CoordinationStore` call on Tokio's blocking thread pool,
/// so it never stalls the manager's own task.
async fn store_call<T, F>(store: &Arc<dyn CoordinationStore>, f: F) -> T
where
    F: FnOnce(&dyn CoordinationStore) -> T + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .expect("coordination store call panicked")
}

struct ClusterManager {
    root: String,
    factory: Arc<dyn StoreFactory>,
    sink: Arc<dyn RawEventSink>,
    store: Option<Arc<dyn CoordinationStore>>,
    connected: bool,
    shutdown: bool,
    current_view: ClusterView,
    availability_set: HashSet<i32>,
    notifier: NotificationManagerHandle,
}

impl ClusterManager {
    fn members_path(&self) -> String {
        format!("{}/members", self.root)
    }

    fn available_path(&self) -> String {
        format!("{}/available", self.root)
    }

    fn member_node_path(&self, id: i32) -> String {
        format!("{}/{}", self.members_path(), id)
    }

    fn available_node_path(&self, id: i32) -> String {
        format!("{}/{}", self.available_path(), id)
    }

    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<ManagerMessage>) {
        while let Some(message) = mailbox.recv().await {
            match message {
                ManagerMessage::Notification(n) => self.handle_notification(n).await,
                ManagerMessage::Command(c) => self.handle_command(c).await,
            }
            if self.shutdown {
                break;
            }
        }
        debug!("cluster manager mailbox closed, task exiting");
    }

    async fn handle_notification(&mut self, notification: Notification) {
        if self.shutdown {
            // Terminal: all subsequent notifications are dropped.
            return;
        }
        match notification {
            Notification::Connected => self.on_connected().await,
            Notification::Disconnected => self.on_disconnected(),
            Notification::Expired => self.on_expired().await,
            Notification::NodeChildrenChanged(path) => self.on_children_changed(path).await,
            Notification::Shutdown => self.on_shutdown().await,
        }
    }

    async fn on_connected(&mut self) {
        // "open store handle if not yet open" — normally already open from
        // `spawn`; this only matters if something closed it out from under
        // us without going through Expired.
        if self.store.is_none() {
            match self.factory.connect(self.sink.clone()) {
                Ok(handle) => {
                    metrics::record_session_opened();
                    self.store = Some(handle);
                }
                Err(e) => {
                    error!("failed to reopen coordination store session: {}", e);
                    return;
                }
            }
        }
        let store = self.store.clone().expect("store handle just ensured");

        if let Err(e) = self.ensure_znodes(&store).await {
            warn!(
                "failed to verify/create well-known znodes, staying disconnected: {}",
                e
            );
            metrics::record_refresh_failure();
            return;
        }

        match self.refresh(&store).await {
            Ok(()) => {
                self.connected = true;
                info!(
                    "cluster manager connected, {} member(s) known",
                    self.current_view.len()
                );
                metrics::record_view_size(self.current_view.len());
                self.notifier
                    .publish(Event::Connected(self.current_view.clone()));
            }
            Err(e) => {
                warn!("initial refresh on connect failed, staying disconnected: {}", e);
                metrics::record_refresh_failure();
            }
        }
    }

    fn on_disconnected(&mut self) {
        if !self.connected {
            // Disconnected₀ --Disconnected--> and Disconnected₁ --Disconnected-->
            // are both no-ops: no duplicate notifications.
            return;
        }
        self.connected = false;
        info!("cluster manager disconnected from the coordination store");
        self.notifier.publish(Event::Disconnected);
    }

    async fn on_expired(&mut self) {
        if let Some(store) = self.store.take() {
            store_call(&store, |s| s.close()).await;
        }
        self.connected = false;
        self.current_view = empty_view();
        self.availability_set.clear();

        match self.factory.connect(self.sink.clone()) {
            Ok(handle) => {
                metrics::record_session_opened();
                self.store = Some(handle);
                info!("session expired; opened a fresh coordination store session");
            }
            Err(e) => {
                error!("failed to open a fresh session after expiry: {}", e);
            }
        }
        // No event is published here: the state machine is simply awaiting
        // a fresh `Connected` from the new session's watcher.
    }

    async fn on_children_changed(&mut self, path: String) {
        if !self.connected {
            return;
        }
        let members_path = self.members_path();
        let available_path = self.available_path();
        if path != members_path && path != available_path {
            debug!("ignoring children-changed event for unrelated path {}", path);
            return;
        }

        let store = self.store.clone().expect("connected implies an open store handle");
        match self.refresh(&store).await {
            Ok(()) => {
                metrics::record_view_size(self.current_view.len());
                self.notifier
                    .publish(Event::NodesChanged(self.current_view.clone()));
            }
            Err(e) => {
                warn!("refresh triggered by watch failed, keeping prior view: {}", e);
                metrics::record_refresh_failure();
            }
        }
    }

    async fn on_shutdown(&mut self) {
        if self.shutdown {
            return; // absorbed if repeated
        }
        self.shutdown = true;
        self.connected = false;
        if let Some(store) = self.store.take() {
            store_call(&store, |s| s.close()).await;
        }
        info!("cluster manager shutting down");
        self.notifier.publish(Event::Shutdown);
    }

    /// Verifies (or creates, with the store's permissive ACL) the three
    /// well-known persistent paths. Pre-existing nodes are never
    /// recreated.
    async fn ensure_znodes(&self, store: &Arc<dyn CoordinationStore>) -> Result<(), StoreError> {
        for path in [self.root.clone(), self.members_path(), self.available_path()] {
            let exists = store_call(store, {
                let path = path.clone();
                move |s| s.exists(&path, false)
            })
            .await?;
            if !exists {
                let result = store_call(store, {
                    let path = path.clone();
                    move |s| s.create(&path, Bytes::new(), CreateMode::Persistent)
                })
                .await;
                match result {
                    Ok(()) | Err(StoreError::NodeExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Rebuilds `current_view` and `availability_set` wholesale from the
    /// store. Re-arms the watch on every `get_children` call used here, as
    /// required by the at-most-once watch contract.
    async fn refresh(&mut self, store: &Arc<dyn CoordinationStore>) -> Result<(), StoreError> {
        let members_path = self.members_path();
        let member_ids = store_call(store, {
            let path = members_path.clone();
            move |s| s.get_children(&path, true)
        })
        .await?;

        let mut members = HashMap::new();
        for id_str in member_ids {
            let Ok(id) = id_str.parse::<i32>() else {
                warn!("ignoring non-numeric member znode name '{}'", id_str);
                continue;
            };
            let node_path = self.member_node_path(id);
            let payload = store_call(store, {
                let node_path = node_path.clone();
                move |s| s.get_data(&node_path, false)
            })
            .await;
            let payload = match payload {
                Ok(p) => p,
                Err(e) => {
                    // The znode could have been removed between the list and
                    // the fetch; skip it without aborting the refresh.
                    debug!("skipping member {} after failed getData: {}", id, e);
                    continue;
                }
            };
            match codec::decode(&payload) {
                Ok(node) => {
                    members.insert(id, node);
                }
                Err(e) => {
                    warn!("skipping member {} with malformed payload: {}", id, e);
                }
            }
        }

        let available_path = self.available_path();
        let available_ids = store_call(store, {
            let path = available_path.clone();
            move |s| s.get_children(&path, true)
        })
        .await?;

        let mut availability_set = HashSet::new();
        for id_str in available_ids {
            if let Ok(id) = id_str.parse::<i32>() {
                if members.contains_key(&id) {
                    availability_set.insert(id);
                }
                // ids under `available` with no matching member entry are
                // discarded; they contribute nothing to the view.
            }
        }

        for (id, node) in members.iter_mut() {
            *node = node.with_available(availability_set.contains(id));
        }

        self.current_view = Arc::new(members);
        self.availability_set = availability_set;
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddNode(node, reply) => self.add_node(node, reply).await,
            Command::RemoveNode(id, reply) => self.remove_node(id, reply).await,
            Command::MarkNodeAvailable(id, reply) => self.mark_available(id, reply).await,
            Command::MarkNodeUnavailable(id, reply) => self.mark_unavailable(id, reply).await,
        }
    }

    async fn add_node(&mut self, node: Node, reply: Reply) {
        let Some(store) = self.require_connected() else {
            let _ = reply.send(Err(MembershipError::NotConnected));
            return;
        };
        let path = self.member_node_path(node.id());
        let exists = store_call(&store, {
            let path = path.clone();
            move |s| s.exists(&path, false)
        })
        .await;
        match exists {
            Ok(true) => {
                let _ = reply.send(Err(MembershipError::DuplicateNode(node.id())));
            }
            Ok(false) => {
                let payload = codec::encode(&node);
                let created = store_call(&store, {
                    let path = path.clone();
                    move |s| s.create(&path, payload, CreateMode::Persistent)
                })
                .await;
                match created {
                    Ok(()) => {
                        let available = self.availability_set.contains(&node.id());
                        let mut view = (*self.current_view).clone();
                        view.insert(node.id(), node.with_available(available));
                        self.current_view = Arc::new(view);
                        metrics::record_view_size(self.current_view.len());
                        metrics::record_command_outcome("add_node", true);
                        self.notifier
                            .publish(Event::NodesChanged(self.current_view.clone()));
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        metrics::record_command_outcome("add_node", false);
                        let _ = reply.send(Err(MembershipError::Store(e)));
                    }
                }
            }
            Err(e) => {
                let _ = reply.send(Err(MembershipError::Store(e)));
            }
        }
    }

    async fn remove_node(&mut self, id: i32, reply: Reply) {
        let Some(store) = self.require_connected() else {
            let _ = reply.send(Err(MembershipError::NotConnected));
            return;
        };
        let path = self.member_node_path(id);
        let exists = store_call(&store, {
            let path = path.clone();
            move |s| s.exists(&path, false)
        })
        .await;
        match exists {
            Ok(false) => {
                let _ = reply.send(Ok(())); // idempotent
            }
            Ok(true) => {
                let deleted = store_call(&store, {
                    let path = path.clone();
                    move |s| s.delete(&path)
                })
                .await;
                match deleted {
                    Ok(()) => {
                        let mut view = (*self.current_view).clone();
                        view.remove(&id);
                        self.current_view = Arc::new(view);
                        metrics::record_view_size(self.current_view.len());
                        metrics::record_command_outcome("remove_node", true);
                        self.notifier
                            .publish(Event::NodesChanged(self.current_view.clone()));
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        metrics::record_command_outcome("remove_node", false);
                        let _ = reply.send(Err(MembershipError::Store(e)));
                    }
                }
            }
            Err(e) => {
                let _ = reply.send(Err(MembershipError::Store(e)));
            }
        }
    }

    async fn mark_available(&mut self, id: i32, reply: Reply) {
        let Some(store) = self.require_connected() else {
            let _ = reply.send(Err(MembershipError::NotConnected));
            return;
        };
        let path = self.available_node_path(id);
        let exists = store_call(&store, {
            let path = path.clone();
            move |s| s.exists(&path, false)
        })
        .await;
        match exists {
            Ok(true) => {
                let _ = reply.send(Ok(())); // already available, no state change
            }
            Ok(false) => {
                let created = store_call(&store, {
                    let path = path.clone();
                    move |s| s.create(&path, Bytes::new(), CreateMode::Ephemeral)
                })
                .await;
                match created {
                    Ok(()) => {
                        self.availability_set.insert(id);
                        self.flip_availability(id, true);
                        metrics::record_command_outcome("mark_available", true);
                        self.notifier
                            .publish(Event::NodesChanged(self.current_view.clone()));
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        metrics::record_command_outcome("mark_available", false);
                        let _ = reply.send(Err(MembershipError::Store(e)));
                    }
                }
            }
            Err(e) => {
                let _ = reply.send(Err(MembershipError::Store(e)));
            }
        }
    }

    async fn mark_unavailable(&mut self, id: i32, reply: Reply) {
        let Some(store) = self.require_connected() else {
            let _ = reply.send(Err(MembershipError::NotConnected));
            return;
        };
        let path = self.available_node_path(id);
        let exists = store_call(&store, {
            let path = path.clone();
            move |s| s.exists(&path, false)
        })
        .await;
        match exists {
            Ok(false) => {
                let _ = reply.send(Ok(()));
            }
            Ok(true) => {
                let deleted = store_call(&store, {
                    let path = path.clone();
                    move |s| s.delete(&path)
                })
                .await;
                match deleted {
                    Ok(()) => {
                        self.availability_set.remove(&id);
                        self.flip_availability(id, false);
                        metrics::record_command_outcome("mark_unavailable", true);
                        self.notifier
                            .publish(Event::NodesChanged(self.current_view.clone()));
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        metrics::record_command_outcome("mark_unavailable", false);
                        let _ = reply.send(Err(MembershipError::Store(e)));
                    }
                }
            }
            Err(e) => {
                let _ = reply.send(Err(MembershipError::Store(e)));
            }
        }
    }

    fn flip_availability(&mut self, id: i32, available: bool) {
        if let Some(node) = self.current_view.get(&id) {
            let mut view = (*self.current_view).clone();
            view.insert(id, node.with_available(available));
            self.current_view = Arc::new(view);
        }
    }

    /// Returns the open store handle if connected, `None` otherwise. Callers
    /// reply `NotConnectedError` themselves on `None` so they keep
    /// ownership of their `reply` channel.
    fn require_connected(&self) -> Option<Arc<dyn CoordinationStore>> {
        if !self.connected {
            return None;
        }
        self.store.clone()
    }
}

/// A cheaply cloneable handle to a running Cluster Manager task. This is
/// the crate's public surface: external callers mutate membership through
/// it and the Watcher Adapter feeds it session/tree events.
#[derive(Clone)]
pub struct ClusterManagerHandle {
    mailbox: mpsc::UnboundedSender<ManagerMessage>,
    notifier: NotificationManagerHandle,
}

impl ClusterManagerHandle {
    /// Opens the first coordination-store session and spawns the Cluster
    /// Manager's task. `root` is `R` from the data model: the cluster's
    /// root path in the coordination store.
    pub fn spawn(
        root: impl Into<String>,
        factory: Arc<dyn StoreFactory>,
    ) -> Result<Self, MembershipError> {
        let root = root.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = NotificationManagerHandle::spawn();
        let sink: Arc<dyn RawEventSink> = Arc::new(WatcherAdapter::new(tx.clone()));

        let store_handle = factory.connect(sink.clone())?;
        metrics::record_session_opened();

        let manager = ClusterManager {
            root,
            factory,
            sink,
            store: Some(store_handle),
            connected: false,
            shutdown: false,
            current_view: empty_view(),
            availability_set: HashSet::new(),
            notifier: notifier.clone(),
        };
        tokio::spawn(manager.run(rx));

        Ok(Self { mailbox: tx, notifier })
    }

    async fn send_command<F>(&self, make: F) -> Result<(), MembershipError>
    where
        F: FnOnce(Reply) -> Command,
    {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.send(ManagerMessage::Command(make(tx))).is_err() {
            return Err(MembershipError::ShuttingDown);
        }
        rx.await.unwrap_or(Err(MembershipError::ShuttingDown))
    }

    pub async fn add_node(&self, node: Node) -> Result<(), MembershipError> {
        self.send_command(|reply| Command::AddNode(node, reply)).await
    }

    pub async fn remove_node(&self, id: i32) -> Result<(), MembershipError> {
        self.send_command(|reply| Command::RemoveNode(id, reply)).await
    }

    pub async fn mark_node_available(&self, id: i32) -> Result<(), MembershipError> {
        self.send_command(|reply| Command::MarkNodeAvailable(id, reply)).await
    }

    pub async fn mark_node_unavailable(&self, id: i32) -> Result<(), MembershipError> {
        self.send_command(|reply| Command::MarkNodeUnavailable(id, reply)).await
    }

    /// Subscribes a new listener to the Notification Manager's event stream.
    pub async fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<Event>) {
        self.notifier.add_listener().await
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.notifier.remove_listener(id);
    }

    /// Requests shutdown. Idempotent; safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self
            .mailbox
            .send(ManagerMessage::Notification(Notification::Shutdown));
    }

    /// Feeds a raw coordination-store event directly into the mailbox,
    /// bypassing a `WatcherAdapter`. Exposed for tests and for embedders
    /// that want to drive the state machine without a real store client.
    pub fn deliver_raw(&self, event: store::RawStoreEvent) {
        WatcherAdapter::new(self.mailbox.clone()).handle_raw_event(event);
    }
}
