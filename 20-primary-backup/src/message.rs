//! Messages exchanged between clients, replica nodes, replication links, the
//! arbiter and the persistence gateway.
//!
//! Client-facing operations and replies derive serde so the console can print
//! them as JSON lines. Everything else carries channel senders and only ever
//! travels inside the process.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ReplicaError, Result};
use crate::replica::NodeStatus;

pub type Key = String;
pub type Value = String;

/// Identity of a replica node within a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Client request. `id` correlates the request with its single reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Get { key: Key, id: i64 },
    Insert { key: Key, value: Value, id: i64 },
    Remove { key: Key, id: i64 },
}

impl Operation {
    pub fn id(&self) -> i64 {
        match self {
            Operation::Get { id, .. }
            | Operation::Insert { id, .. }
            | Operation::Remove { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationReply {
    Ack { id: i64 },
    Failed { id: i64 },
    GetResult { key: Key, value: Option<Value>, id: i64 },
}

impl OperationReply {
    pub fn id(&self) -> i64 {
        match self {
            OperationReply::Ack { id }
            | OperationReply::Failed { id }
            | OperationReply::GetResult { id, .. } => *id,
        }
    }
}

pub type ClientRef = mpsc::UnboundedSender<OperationReply>;
pub type ReplicatorRef = mpsc::UnboundedSender<ReplicatorMessage>;
pub type ArbiterRef = mpsc::UnboundedSender<ArbiterMessage>;
pub type PersistenceRef = mpsc::UnboundedSender<Persist>;

/// Address of a replica node: its id plus its inbox.
///
/// Equality and hashing only look at the id, so a replica set built from
/// arbiter notifications deduplicates by identity.
#[derive(Clone)]
pub struct ReplicaRef {
    id: ReplicaId,
    inbox: mpsc::UnboundedSender<NodeMessage>,
}

impl ReplicaRef {
    pub fn new(id: ReplicaId, inbox: mpsc::UnboundedSender<NodeMessage>) -> Self {
        Self { id, inbox }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn inbox(&self) -> &mpsc::UnboundedSender<NodeMessage> {
        &self.inbox
    }

    pub fn send(&self, message: NodeMessage) -> Result<()> {
        self.inbox
            .send(message)
            .map_err(|_| ReplicaError::NodeStopped(self.id))
    }
}

impl PartialEq for ReplicaRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReplicaRef {}

impl Hash for ReplicaRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ReplicaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReplicaRef").field(&self.id).finish()
    }
}

/// Inbox of a replica node.
#[derive(Debug)]
pub enum NodeMessage {
    /// Arbiter: this node is the primary.
    JoinedPrimary,
    /// Arbiter: this node is a secondary.
    JoinedSecondary,
    /// Arbiter: the current replica set. May include the receiving node itself.
    Replicas(HashSet<ReplicaRef>),
    Operation {
        op: Operation,
        reply_to: ClientRef,
    },
    /// Replication link: the secondary confirmed the update sent for `id`.
    Replicated {
        replica: ReplicaId,
        key: Key,
        id: i64,
    },
    /// Replication link: ordered update for a secondary.
    Snapshot {
        key: Key,
        value: Option<Value>,
        seq: u64,
        reply_to: ReplicatorRef,
    },
    /// Persistence gateway: `seq` is durable.
    Persisted { key: Key, seq: u64 },
    /// Deadline of the pending write `id` expired.
    OperationTimeout { id: i64, generation: u64 },
    Status {
        respond_to: oneshot::Sender<NodeStatus>,
    },
    Shutdown,
}

/// Inbox of a replication link.
#[derive(Debug)]
pub enum ReplicatorMessage {
    Replicate {
        key: Key,
        value: Option<Value>,
        id: i64,
    },
    SnapshotAck { key: Key, seq: u64 },
}

/// Inbox of the arbiter.
#[derive(Debug)]
pub enum ArbiterMessage {
    Join(ReplicaRef),
    Leave(ReplicaId),
}

/// Durability request handed to the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persist {
    pub key: Key,
    pub value: Option<Value>,
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_serialize_with_type_tag() {
        let op = Operation::Insert {
            key: "a".into(),
            value: "1".into(),
            id: 7,
        };
        let json = serde_json::to_string(&op).expect("serialize operation");
        assert_eq!(json, r#"{"type":"insert","key":"a","value":"1","id":7}"#);

        let reply: OperationReply =
            serde_json::from_str(r#"{"type":"get_result","key":"a","value":null,"id":3}"#)
                .expect("deserialize reply");
        assert_eq!(
            reply,
            OperationReply::GetResult {
                key: "a".into(),
                value: None,
                id: 3
            }
        );
    }

    #[test]
    fn replica_refs_compare_by_id() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let first = ReplicaRef::new(ReplicaId(4), tx_a);
        let second = ReplicaRef::new(ReplicaId(4), tx_b);

        let set: HashSet<ReplicaRef> = [first, second].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn send_to_stopped_node_reports_its_id() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let replica = ReplicaRef::new(ReplicaId(9), tx);
        assert_eq!(
            replica.send(NodeMessage::Shutdown),
            Err(ReplicaError::NodeStopped(ReplicaId(9)))
        );
    }
}
