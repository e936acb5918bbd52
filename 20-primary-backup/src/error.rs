//! Error types for the replicated store.
//!
//! Nothing inside a node is fatal: lost acknowledgments are retried and slow
//! replicas surface as a `Failed` reply. The errors here are what callers
//! outside the actors can observe.

use thiserror::Error;

use crate::message::ReplicaId;

/// Result type alias for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    /// The node's inbox is closed or it dropped a reply channel.
    #[error("replica {0} has stopped")]
    NodeStopped(ReplicaId),

    /// The arbiter's inbox is closed, so a node cannot join.
    #[error("arbiter has stopped")]
    ArbiterStopped,

    /// Timing configuration rejected by [`crate::ReplicaConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No node with this id is part of the local cluster.
    #[error("unknown replica {0}")]
    UnknownReplica(ReplicaId),

    /// The local cluster has no node yet.
    #[error("cluster has no primary")]
    NoPrimary,

    /// Leader election is not supported, so the primary stays for good.
    #[error("{0} is the primary and cannot leave")]
    PrimaryCannotLeave(ReplicaId),

    /// The node answered `Failed` for this request id.
    #[error("operation {0} failed")]
    OperationFailed(i64),

    /// No reply arrived for this request id before the client gave up.
    #[error("no reply for operation {0}")]
    NoReply(i64),

    /// The reply did not match the kind of operation sent.
    #[error("unexpected reply for operation {0}")]
    UnexpectedReply(i64),
}
