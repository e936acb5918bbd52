//! Replica node state machine.
//!
//! A node starts uninitialized, sends `Join` to the arbiter and is then told
//! once whether it is the primary or a secondary. The role never changes
//! afterwards. All state (store, pending writes, replication links, sequence
//! counter) is owned by the node task and only touched while it processes one
//! message from its inbox.
//!
//! # Primary
//!
//! Writes are applied to the local store immediately, so the primary always
//! reads its own writes. The write is then fanned out to every replication
//! link and the client gets `Ack` once every link it was sent to has confirmed
//! it. A replica that leaves the cluster stops counting, which may complete a
//! write. Writes that are still waiting when their deadline fires get `Failed`.
//!
//! # Secondary
//!
//! Snapshots are applied strictly in sequence order. Future sequences are
//! dropped and left to the link's retransmission. An applied snapshot is
//! acknowledged only after the persistence gateway confirms it; unconfirmed
//! requests are re-issued on every retry tick. A resent snapshot is
//! re-acknowledged at once if it is already durable, otherwise it waits for
//! the same confirmation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::client::Client;
use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::message::{
    ArbiterMessage, ArbiterRef, ClientRef, Key, NodeMessage, Operation, OperationReply, Persist,
    PersistenceRef, ReplicaId, ReplicaRef, ReplicatorMessage, ReplicatorRef, Value,
};
use crate::persistence::{spawn_persistence, PersistenceGateway};
use crate::replicator::ReplicatorHandle;
use crate::store::KvStore;
use crate::timer::{Deadline, RetryTicker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Uninitialized,
    Primary,
    Secondary,
}

/// Point-in-time view of a node, answered to `Status` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub replica: ReplicaId,
    pub role: RoleKind,
    pub store: BTreeMap<Key, Value>,
    /// Replica set known to a primary, empty otherwise.
    pub replicas: Vec<ReplicaId>,
    /// Writes waiting for replica confirmations (primary only).
    pub pending_writes: usize,
    /// Next sequence a secondary will apply.
    pub expected_seq: Option<u64>,
    /// Snapshots applied but not yet confirmed durable (secondary only).
    pub outstanding_persists: usize,
}

/// Caller-side handle of a running node.
pub struct ReplicaHandle {
    replica: ReplicaRef,
    config: ReplicaConfig,
    task: JoinHandle<()>,
}

impl ReplicaHandle {
    pub fn id(&self) -> ReplicaId {
        self.replica.id()
    }

    pub fn replica_ref(&self) -> &ReplicaRef {
        &self.replica
    }

    /// A client with its own reply inbox. It waits up to twice the operation
    /// deadline for each reply.
    pub fn client(&self) -> Client {
        Client::new(self.replica.clone(), self.config.operation_timeout * 2)
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let (respond_to, response) = oneshot::channel();
        self.replica.send(NodeMessage::Status { respond_to })?;
        response
            .await
            .map_err(|_| ReplicaError::NodeStopped(self.replica.id()))
    }

    /// Stops the node. Writes still pending are answered `Failed`.
    pub async fn shutdown(self) -> Result<()> {
        self.replica.send(NodeMessage::Shutdown)?;
        if let Err(err) = self.task.await {
            warn!(replica = %self.replica.id(), error = ?err, "replica task ended abnormally");
        }
        Ok(())
    }
}

/// Spawns a node, registers it with the arbiter and returns its handle.
///
/// `gateway` backs the node's persistence; only a secondary ever uses it.
pub fn spawn_replica<G>(
    id: ReplicaId,
    config: ReplicaConfig,
    arbiter: &ArbiterRef,
    gateway: G,
) -> Result<ReplicaHandle>
where
    G: PersistenceGateway,
{
    config.validate()?;

    let (tx, rx) = mpsc::unbounded_channel();
    let replica = ReplicaRef::new(id, tx);
    let persistence = spawn_persistence(gateway, replica.inbox().clone());

    arbiter
        .send(ArbiterMessage::Join(replica.clone()))
        .map_err(|_| ReplicaError::ArbiterStopped)?;

    let node = ReplicaNode {
        id,
        config,
        self_ref: replica.clone(),
        inbox: rx,
        store: KvStore::new(),
        role: Role::Uninitialized,
        persistence,
        ticker: RetryTicker::new(config.retry_interval),
    };
    let task = tokio::spawn(node.run().instrument(info_span!("replica", %id)));

    Ok(ReplicaHandle {
        replica,
        config,
        task,
    })
}

enum Role {
    Uninitialized,
    Primary(PrimaryState),
    Secondary(SecondaryState),
}

impl Role {
    fn kind(&self) -> RoleKind {
        match self {
            Role::Uninitialized => RoleKind::Uninitialized,
            Role::Primary(_) => RoleKind::Primary,
            Role::Secondary(_) => RoleKind::Secondary,
        }
    }
}

/// A write the client is still waiting on.
struct PendingWrite {
    reply_to: ClientRef,
    awaiting: HashSet<ReplicaId>,
    generation: u64,
    _deadline: Deadline,
}

#[derive(Default)]
struct PrimaryState {
    replicators: HashMap<ReplicaId, ReplicatorHandle>,
    pending: HashMap<i64, PendingWrite>,
    next_generation: u64,
}

impl PrimaryState {
    /// Records that `replica` no longer owes a confirmation for `id`.
    fn confirm(&mut self, id: i64, replica: ReplicaId) {
        let Some(write) = self.pending.get_mut(&id) else {
            return;
        };
        write.awaiting.remove(&replica);
        if write.awaiting.is_empty() {
            self.complete(id);
        }
    }

    /// Drops `replica` from every pending write and acks those left with
    /// nothing to wait for.
    fn forget_replica(&mut self, replica: ReplicaId) {
        let released: Vec<i64> = self
            .pending
            .iter_mut()
            .filter_map(|(id, write)| {
                (write.awaiting.remove(&replica) && write.awaiting.is_empty()).then_some(*id)
            })
            .collect();
        for id in released {
            self.complete(id);
        }
    }

    fn complete(&mut self, id: i64) {
        if let Some(write) = self.pending.remove(&id) {
            debug!(id, "write fully replicated");
            let _ = write.reply_to.send(OperationReply::Ack { id });
        }
    }
}

struct OutstandingPersist {
    request: Persist,
    reply_to: ReplicatorRef,
}

#[derive(Default)]
struct SecondaryState {
    expected_seq: u64,
    outstanding: BTreeMap<u64, OutstandingPersist>,
}

struct ReplicaNode {
    id: ReplicaId,
    config: ReplicaConfig,
    self_ref: ReplicaRef,
    inbox: mpsc::UnboundedReceiver<NodeMessage>,
    store: KvStore,
    role: Role,
    persistence: PersistenceRef,
    ticker: RetryTicker,
}

impl ReplicaNode {
    async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.inbox.recv() => {
                    let Some(message) = message else { break };
                    if !self.handle(message) {
                        break;
                    }
                }
                _ = self.ticker.tick() => self.retry_persistence(),
            }
        }
        self.fail_pending_writes();
        info!("replica stopped");
    }

    /// Returns `false` once the node should stop.
    fn handle(&mut self, message: NodeMessage) -> bool {
        match message {
            NodeMessage::JoinedPrimary => self.become_primary(),
            NodeMessage::JoinedSecondary => self.become_secondary(),
            NodeMessage::Replicas(replicas) => self.reconcile_replicas(replicas),
            NodeMessage::Operation { op, reply_to } => self.handle_operation(op, reply_to),
            NodeMessage::Replicated { replica, key, id } => {
                self.handle_replicated(replica, &key, id)
            }
            NodeMessage::Snapshot {
                key,
                value,
                seq,
                reply_to,
            } => self.handle_snapshot(key, value, seq, reply_to),
            NodeMessage::Persisted { key, seq } => self.handle_persisted(key, seq),
            NodeMessage::OperationTimeout { id, generation } => self.handle_timeout(id, generation),
            NodeMessage::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            NodeMessage::Shutdown => return false,
        }
        true
    }

    fn become_primary(&mut self) {
        if !matches!(self.role, Role::Uninitialized) {
            warn!(role = ?self.role.kind(), "ignoring JoinedPrimary, role already assigned");
            return;
        }
        info!("joined as primary");
        self.role = Role::Primary(PrimaryState::default());
    }

    fn become_secondary(&mut self) {
        if !matches!(self.role, Role::Uninitialized) {
            warn!(role = ?self.role.kind(), "ignoring JoinedSecondary, role already assigned");
            return;
        }
        info!("joined as secondary");
        self.role = Role::Secondary(SecondaryState::default());
    }

    fn handle_operation(&mut self, op: Operation, reply_to: ClientRef) {
        if matches!(self.role, Role::Uninitialized) {
            debug!(id = op.id(), "operation before role assignment");
            let _ = reply_to.send(OperationReply::Failed { id: op.id() });
            return;
        }
        match op {
            Operation::Get { key, id } => {
                let value = self.store.get(&key);
                let _ = reply_to.send(OperationReply::GetResult { key, value, id });
            }
            Operation::Insert { key, value, id } => {
                self.handle_write(key, Some(value), id, reply_to)
            }
            Operation::Remove { key, id } => self.handle_write(key, None, id, reply_to),
        }
    }

    fn handle_write(&mut self, key: Key, value: Option<Value>, id: i64, reply_to: ClientRef) {
        let Role::Primary(primary) = &mut self.role else {
            debug!(id, "write rejected, not the primary");
            let _ = reply_to.send(OperationReply::Failed { id });
            return;
        };
        // Negative ids belong to catch-up batches.
        if id < 0 || primary.pending.contains_key(&id) {
            warn!(id, "write rejected, id negative or already pending");
            let _ = reply_to.send(OperationReply::Failed { id });
            return;
        }

        self.store.apply(key.clone(), value.clone());

        let awaiting: HashSet<ReplicaId> = primary.replicators.keys().copied().collect();
        for link in primary.replicators.values() {
            link.replicate(key.clone(), value.clone(), id);
        }
        if awaiting.is_empty() {
            let _ = reply_to.send(OperationReply::Ack { id });
            return;
        }

        let generation = primary.next_generation;
        primary.next_generation += 1;
        let deadline = Deadline::schedule(
            self.config.operation_timeout,
            self.self_ref.inbox().clone(),
            NodeMessage::OperationTimeout { id, generation },
        );
        trace!(id, key = %key, replicas = awaiting.len(), "write fanned out");
        primary.pending.insert(
            id,
            PendingWrite {
                reply_to,
                awaiting,
                generation,
                _deadline: deadline,
            },
        );
    }

    fn handle_replicated(&mut self, replica: ReplicaId, key: &str, id: i64) {
        let Role::Primary(primary) = &mut self.role else {
            return;
        };
        if id < 0 {
            trace!(replica = %replica, key, id, "catch-up entry replicated");
            return;
        }
        primary.confirm(id, replica);
    }

    fn handle_timeout(&mut self, id: i64, generation: u64) {
        let Role::Primary(primary) = &mut self.role else {
            return;
        };
        let current = primary.pending.get(&id).map(|write| write.generation);
        if current != Some(generation) {
            return;
        }
        if let Some(write) = primary.pending.remove(&id) {
            warn!(id, missing = ?write.awaiting, "write not replicated before deadline");
            let _ = write.reply_to.send(OperationReply::Failed { id });
        }
    }

    fn reconcile_replicas(&mut self, replicas: HashSet<ReplicaRef>) {
        let Role::Primary(primary) = &mut self.role else {
            debug!("ignoring replica set, not the primary");
            return;
        };

        let wanted: HashMap<ReplicaId, ReplicaRef> = replicas
            .into_iter()
            .filter(|replica| replica.id() != self.id)
            .map(|replica| (replica.id(), replica))
            .collect();

        let departed: Vec<ReplicaId> = primary
            .replicators
            .keys()
            .filter(|id| !wanted.contains_key(id))
            .copied()
            .collect();
        for replica in departed {
            if let Some(link) = primary.replicators.remove(&replica) {
                link.stop();
            }
            info!(replica = %replica, "secondary left");
            primary.forget_replica(replica);
        }

        for (replica_id, replica) in wanted {
            if primary.replicators.contains_key(&replica_id) {
                continue;
            }
            let link = ReplicatorHandle::spawn(
                replica,
                self.self_ref.inbox().clone(),
                self.config.retry_interval,
            );
            for (n, (key, value)) in self.store.iter().enumerate() {
                link.replicate(key.clone(), Some(value.clone()), -(n as i64) - 1);
            }
            info!(replica = %replica_id, catch_up = self.store.len(), "secondary joined");
            primary.replicators.insert(replica_id, link);
        }
    }

    fn handle_snapshot(
        &mut self,
        key: Key,
        value: Option<Value>,
        seq: u64,
        reply_to: ReplicatorRef,
    ) {
        let Role::Secondary(secondary) = &mut self.role else {
            debug!(seq, "ignoring snapshot, not a secondary");
            return;
        };
        match seq.cmp(&secondary.expected_seq) {
            Ordering::Less => {
                // Not durable yet: the ack follows the gateway's confirmation.
                if let Some(outstanding) = secondary.outstanding.get_mut(&seq) {
                    trace!(seq, "snapshot resent while persistence is outstanding");
                    outstanding.reply_to = reply_to;
                    return;
                }
                trace!(seq, "re-acknowledging durable snapshot");
                let _ = reply_to.send(ReplicatorMessage::SnapshotAck { key, seq });
            }
            Ordering::Greater => {
                debug!(seq, expected = secondary.expected_seq, "dropping out-of-order snapshot");
            }
            Ordering::Equal => {
                self.store.apply(key.clone(), value.clone());
                secondary.expected_seq += 1;
                let request = Persist { key, value, seq };
                let _ = self.persistence.send(request.clone());
                secondary
                    .outstanding
                    .insert(seq, OutstandingPersist { request, reply_to });
            }
        }
    }

    fn handle_persisted(&mut self, key: Key, seq: u64) {
        let Role::Secondary(secondary) = &mut self.role else {
            return;
        };
        let Some(outstanding) = secondary.outstanding.remove(&seq) else {
            trace!(seq, "duplicate persistence confirmation");
            return;
        };
        debug!(seq, key = %key, "snapshot durable");
        let _ = outstanding
            .reply_to
            .send(ReplicatorMessage::SnapshotAck { key, seq });
    }

    fn retry_persistence(&self) {
        let Role::Secondary(secondary) = &self.role else {
            return;
        };
        for (seq, outstanding) in &secondary.outstanding {
            trace!(seq, "re-issuing persistence request");
            let _ = self.persistence.send(outstanding.request.clone());
        }
    }

    fn fail_pending_writes(&mut self) {
        if let Role::Primary(primary) = &mut self.role {
            for (id, write) in primary.pending.drain() {
                let _ = write.reply_to.send(OperationReply::Failed { id });
            }
        }
    }

    fn status(&self) -> NodeStatus {
        let mut status = NodeStatus {
            replica: self.id,
            role: self.role.kind(),
            store: self.store.snapshot(),
            replicas: Vec::new(),
            pending_writes: 0,
            expected_seq: None,
            outstanding_persists: 0,
        };
        match &self.role {
            Role::Uninitialized => {}
            Role::Primary(primary) => {
                status.replicas = primary.replicators.keys().copied().collect();
                status.replicas.sort();
                status.pending_writes = primary.pending.len();
            }
            Role::Secondary(secondary) => {
                status.expected_seq = Some(secondary.expected_seq);
                status.outstanding_persists = secondary.outstanding.len();
            }
        }
        status
    }
}
