//! The `Node` record and the cluster view built from it.

use crate::error::MembershipError;
use std::collections::HashMap;
use std::sync::Arc;

/// A single member of the cluster as seen through the coordination store.
///
/// Identity and hashing are keyed on `id` alone: ids are assigned and owned
/// by whoever creates the membership entry at `R/members/<id>`, and the
/// coordination store already guarantees at most one entry per id, so `id`
/// is the only field that can serve as a stable key. `url` and `partitions`
/// describe a node but don't identify it, and `available` is derived
/// per-refresh rather than being part of the node's identity at all. See
/// DESIGN.md for the rejected alternative (keying on `(id, url)`).
#[derive(Debug, Clone)]
pub struct Node {
    id: i32,
    url: String,
    partitions: Vec<i32>,
    available: bool,
}

impl Node {
    /// Constructs a node. Fails immediately if `url` is empty, matching the
    /// "construction with either absent fails immediately" rule for `url`
    /// and `partitions` in the data model.
    pub fn new(id: i32, url: impl Into<String>, partitions: Vec<i32>) -> Result<Self, MembershipError> {
        let url = url.into();
        if url.is_empty() {
            return Err(MembershipError::InvalidNode(format!(
                "node {id} has an empty url"
            )));
        }
        Ok(Self {
            id,
            url,
            partitions,
            available: false,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn partitions(&self) -> &[i32] {
        &self.partitions
    }

    pub fn available(&self) -> bool {
        self.available
    }

    /// Returns a copy of this node with `available` set, used by the manager
    /// to stamp the derived availability bit onto a freshly decoded node.
    pub fn with_available(&self, available: bool) -> Self {
        Self {
            available,
            ..self.clone()
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// An immutable snapshot of the cluster's membership, handed to subscribers
/// by the Notification Manager. Rebuilt wholesale on every refresh; never
/// mutated in place once published.
pub type ClusterView = Arc<HashMap<i32, Node>>;

/// Builds an empty view, used as the manager's initial state and in tests.
pub fn empty_view() -> ClusterView {
    Arc::new(HashMap::new())
}
