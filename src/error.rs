//! The primary error type for the cluster-membership coordination core.

use thiserror::Error;

/// Errors that can occur while encoding or decoding, or operating, a node record.
#[derive(Error, Debug)]
pub enum MembershipError {
    /// A node payload read from the coordination store could not be decoded.
    #[error("malformed node payload: {0}")]
    MalformedNode(String),

    /// A mutation command was received while the manager was not in the `Connected` state.
    #[error("cluster manager is not connected to the coordination store")]
    NotConnected,

    /// `AddNode` was issued for an id that already has a membership entry.
    #[error("node {0} already exists")]
    DuplicateNode(i32),

    /// A node could not be constructed because a required field was missing.
    #[error("invalid node record: {0}")]
    InvalidNode(String),

    /// Wraps any failure surfaced by the coordination-store client.
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    /// The manager has already shut down and rejects all further messages.
    #[error("cluster manager has shut down")]
    ShuttingDown,
}

/// Errors surfaced by a `CoordinationStore` implementation.
///
/// Kept distinct from `MembershipError` so that store adapters (which know
/// nothing about node records or the manager's state machine) have their own
/// narrow error surface; `MembershipError::Store` wraps it at the seam.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("not connected to the coordination store")]
    NotConnected,

    #[error("no node at path {0}")]
    NoNode(String),

    #[error("node already exists at path {0}")]
    NodeExists(String),

    #[error("session expired")]
    SessionExpired,

    #[error("coordination store transport error: {0}")]
    Transport(String),
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
