//! In-process membership arbiter.
//!
//! The first node to join becomes the primary and every later node a
//! secondary. After each membership change the primary receives the full
//! replica set, itself included.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::message::{ArbiterMessage, ArbiterRef, NodeMessage, ReplicaId, ReplicaRef};

/// Starts the arbiter. It runs until every [`ArbiterRef`] is dropped.
pub fn spawn_arbiter() -> (ArbiterRef, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let arbiter = Arbiter {
        inbox: rx,
        primary: None,
        secondaries: BTreeMap::new(),
    };
    (tx, tokio::spawn(arbiter.run()))
}

struct Arbiter {
    inbox: mpsc::UnboundedReceiver<ArbiterMessage>,
    primary: Option<ReplicaRef>,
    secondaries: BTreeMap<ReplicaId, ReplicaRef>,
}

impl Arbiter {
    async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            match message {
                ArbiterMessage::Join(replica) => self.join(replica),
                ArbiterMessage::Leave(id) => self.leave(id),
            }
        }
    }

    fn join(&mut self, replica: ReplicaRef) {
        let id = replica.id();
        if self.is_member(id) {
            warn!(replica = %id, "duplicate join ignored");
            return;
        }
        if self.primary.is_none() {
            info!(replica = %id, "assigning primary");
            let _ = replica.send(NodeMessage::JoinedPrimary);
            self.primary = Some(replica);
        } else {
            info!(replica = %id, "assigning secondary");
            let _ = replica.send(NodeMessage::JoinedSecondary);
            self.secondaries.insert(id, replica);
        }
        self.publish();
    }

    fn leave(&mut self, id: ReplicaId) {
        if self.primary.as_ref().map(ReplicaRef::id) == Some(id) {
            warn!(replica = %id, "primary cannot leave the cluster");
            return;
        }
        if self.secondaries.remove(&id).is_none() {
            warn!(replica = %id, "leave for unknown replica ignored");
            return;
        }
        info!(replica = %id, "secondary removed");
        self.publish();
    }

    fn is_member(&self, id: ReplicaId) -> bool {
        self.primary.as_ref().map(ReplicaRef::id) == Some(id) || self.secondaries.contains_key(&id)
    }

    fn publish(&self) {
        let Some(primary) = &self.primary else {
            return;
        };
        let replicas: HashSet<ReplicaRef> = std::iter::once(primary.clone())
            .chain(self.secondaries.values().cloned())
            .collect();
        let _ = primary.send(NodeMessage::Replicas(replicas));
    }
}
