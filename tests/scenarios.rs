//! End-to-end scenarios (spec.md §8) driving the real `ClusterManagerHandle`
//! against the in-memory `FakeCluster`, exactly as an external caller or a
//! real coordination-store watcher would.

use membership_core::codec;
use membership_core::error::MembershipError;
use membership_core::store::fake::FakeCluster;
use membership_core::store::{RawStoreEvent, StoreFactory};
use membership_core::{ClusterManagerHandle, Event, Node};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const ROOT: &str = "/cluster";

fn members_path() -> String {
    format!("{ROOT}/members")
}

fn available_path() -> String {
    format!("{ROOT}/available")
}

fn member_node(id: i32) -> String {
    format!("{}/{}", members_path(), id)
}

fn available_node(id: i32) -> String {
    format!("{}/{}", available_path(), id)
}

fn spawn_manager(cluster: &FakeCluster) -> ClusterManagerHandle {
    let factory: Arc<dyn StoreFactory> = Arc::new(cluster.factory());
    ClusterManagerHandle::spawn(ROOT, factory).expect("initial session should open")
}

/// Waits for the next event, failing the test if none arrives promptly.
async fn next_event(events: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("expected an event but none arrived")
        .expect("event stream closed unexpectedly")
}

/// Asserts nothing is published within a short window.
async fn assert_no_event(events: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) {
    let result = timeout(Duration::from_millis(100), events.recv()).await;
    assert!(
        result.is_err(),
        "expected no event, but got {:?}",
        result.map(|e| format!("{e:?}"))
    );
}

fn seed_member(cluster: &FakeCluster, node: &Node) {
    cluster.seed_persistent(member_node(node.id()), codec::encode(node));
}

#[tokio::test]
async fn scenario_1_fresh_connect_populates_the_view() {
    let cluster = FakeCluster::new();
    let n1 = Node::new(1, "localhost:31313", vec![1, 2]).unwrap();
    let n2 = Node::new(2, "localhost:31314", vec![2, 3]).unwrap();
    let n3 = Node::new(3, "localhost:31315", vec![2, 3]).unwrap();
    seed_member(&cluster, &n1);
    seed_member(&cluster, &n2);
    seed_member(&cluster, &n3);
    cluster.seed_ephemeral(available_node(1));
    cluster.seed_ephemeral(available_node(2));

    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;

    manager.deliver_raw(RawStoreEvent::SyncConnected);

    match next_event(&mut events).await {
        Event::Connected(view) => {
            assert_eq!(view.len(), 3);
            assert!(view[&1].available());
            assert!(view[&2].available());
            assert!(!view[&3].available());
        }
        other => panic!("expected Connected, got {other:?}"),
    }
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_2_availability_flip() {
    let cluster = FakeCluster::new();
    seed_member(&cluster, &Node::new(1, "localhost:31313", vec![1, 2]).unwrap());
    seed_member(&cluster, &Node::new(2, "localhost:31314", vec![2, 3]).unwrap());
    seed_member(&cluster, &Node::new(3, "localhost:31315", vec![2, 3]).unwrap());
    cluster.seed_ephemeral(available_node(1));
    cluster.seed_ephemeral(available_node(2));

    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    next_event(&mut events).await; // Connected

    cluster.remove(&available_node(2));
    cluster.seed_ephemeral(available_node(3));
    manager.deliver_raw(RawStoreEvent::NodeChildrenChanged(available_path()));

    match next_event(&mut events).await {
        Event::NodesChanged(view) => {
            assert_eq!(view.len(), 3);
            assert!(view[&1].available());
            assert!(!view[&2].available());
            assert!(view[&3].available());
        }
        other => panic!("expected NodesChanged, got {other:?}"),
    }
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_3_all_unavailable() {
    let cluster = FakeCluster::new();
    seed_member(&cluster, &Node::new(1, "h1", vec![]).unwrap());
    seed_member(&cluster, &Node::new(2, "h2", vec![]).unwrap());
    seed_member(&cluster, &Node::new(3, "h3", vec![]).unwrap());
    cluster.seed_ephemeral(available_node(1));
    cluster.seed_ephemeral(available_node(2));
    cluster.seed_ephemeral(available_node(3));

    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    next_event(&mut events).await; // Connected

    cluster.remove(&available_node(1));
    cluster.remove(&available_node(2));
    cluster.remove(&available_node(3));
    manager.deliver_raw(RawStoreEvent::NodeChildrenChanged(available_path()));

    match next_event(&mut events).await {
        Event::NodesChanged(view) => {
            assert_eq!(view.len(), 3);
            assert!(view.values().all(|n| !n.available()));
        }
        other => panic!("expected NodesChanged, got {other:?}"),
    }
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_4_membership_growth() {
    let cluster = FakeCluster::new();
    seed_member(&cluster, &Node::new(1, "h1", vec![]).unwrap());
    seed_member(&cluster, &Node::new(2, "h2", vec![]).unwrap());
    cluster.seed_ephemeral(available_node(1));
    cluster.seed_ephemeral(available_node(2));

    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    next_event(&mut events).await; // Connected

    seed_member(&cluster, &Node::new(3, "h3", vec![]).unwrap());
    manager.deliver_raw(RawStoreEvent::NodeChildrenChanged(members_path()));

    match next_event(&mut events).await {
        Event::NodesChanged(view) => {
            assert_eq!(view.len(), 3);
            assert!(view[&1].available());
            assert!(view[&2].available());
            assert!(!view[&3].available());
        }
        other => panic!("expected NodesChanged, got {other:?}"),
    }
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_5_rejected_commands_while_disconnected() {
    let cluster = FakeCluster::new();
    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;

    let n1 = Node::new(1, "h1", vec![]).unwrap();
    assert!(matches!(
        manager.add_node(n1).await,
        Err(MembershipError::NotConnected)
    ));
    assert!(matches!(
        manager.remove_node(1).await,
        Err(MembershipError::NotConnected)
    ));
    assert!(matches!(
        manager.mark_node_available(1).await,
        Err(MembershipError::NotConnected)
    ));
    assert!(matches!(
        manager.mark_node_unavailable(1).await,
        Err(MembershipError::NotConnected)
    ));

    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_6_session_expiry_triggers_reconnect() {
    let cluster = FakeCluster::new();
    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    next_event(&mut events).await; // Connected

    assert_eq!(cluster.session_count(), 1);

    manager.deliver_raw(RawStoreEvent::Expired);
    // Expiry publishes nothing; give the manager a beat to process it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cluster.session_count(), 2);

    manager.deliver_raw(RawStoreEvent::SyncConnected);
    match next_event(&mut events).await {
        Event::Connected(view) => assert!(view.is_empty()),
        other => panic!("expected Connected, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_7_add_then_remove_round_trip() {
    let cluster = FakeCluster::new();
    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    next_event(&mut events).await; // Connected

    let n1 = Node::new(1, "localhost:31313", vec![1]).unwrap();
    manager.add_node(n1).await.expect("add should succeed");
    match next_event(&mut events).await {
        Event::NodesChanged(view) => {
            assert_eq!(view.len(), 1);
            assert!(!view[&1].available());
        }
        other => panic!("expected NodesChanged, got {other:?}"),
    }

    manager.remove_node(1).await.expect("remove should succeed");
    match next_event(&mut events).await {
        Event::NodesChanged(view) => assert!(view.is_empty()),
        other => panic!("expected NodesChanged, got {other:?}"),
    }
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_8_duplicate_add() {
    let cluster = FakeCluster::new();
    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    next_event(&mut events).await; // Connected

    let n1 = Node::new(1, "localhost:31313", vec![]).unwrap();
    manager.add_node(n1).await.expect("first add should succeed");
    next_event(&mut events).await; // NodesChanged

    let n1_again = Node::new(1, "localhost:31313", vec![]).unwrap();
    assert!(matches!(
        manager.add_node(n1_again).await,
        Err(MembershipError::DuplicateNode(1))
    ));
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_9_idempotent_mark_available() {
    let cluster = FakeCluster::new();
    seed_member(&cluster, &Node::new(1, "h1", vec![]).unwrap());
    cluster.seed_ephemeral(available_node(1));

    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    match next_event(&mut events).await {
        Event::Connected(view) => assert!(view[&1].available()),
        other => panic!("expected Connected, got {other:?}"),
    }

    manager
        .mark_node_available(1)
        .await
        .expect("marking an already-available node should succeed");

    // No state change, so no NodesChanged is published.
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn scenario_10_shutdown_closes_the_store_once_and_stops_publishing() {
    let cluster = FakeCluster::new();
    let manager = spawn_manager(&cluster);
    let (_id, mut events) = manager.subscribe().await;
    manager.deliver_raw(RawStoreEvent::SyncConnected);
    next_event(&mut events).await; // Connected

    assert_eq!(cluster.close_count(), 0);

    manager.shutdown();
    match next_event(&mut events).await {
        Event::Shutdown => {}
        other => panic!("expected Shutdown, got {other:?}"),
    }
    // Give the manager's task a beat to finish unwinding out of its mailbox
    // loop (its handler already ran; this just lets it drop its receiver).
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cluster.close_count(), 1);
    assert_no_event(&mut events).await;

    // Repeated shutdown is absorbed: no second close, no second event.
    manager.shutdown();
    assert_no_event(&mut events).await;
    assert_eq!(cluster.close_count(), 1);

    // Post-shutdown notifications and commands are dropped/rejected; no
    // further events are published and the store is never closed again.
    manager.deliver_raw(RawStoreEvent::NodeChildrenChanged(members_path()));
    let n1 = Node::new(1, "h1", vec![]).unwrap();
    let add_result = timeout(Duration::from_secs(1), manager.add_node(n1))
        .await
        .expect("mailbox is closed after shutdown; add_node must not hang");
    assert!(matches!(add_result, Err(MembershipError::ShuttingDown)));
    assert_no_event(&mut events).await;
    assert_eq!(cluster.close_count(), 1);
}
