//! Primary-backup replicated key-value store.
//!
//! A single primary accepts reads and writes from clients. Every write is fanned
//! out to zero or more secondaries, each of which applies the ordered update
//! stream and makes it durable before acknowledging. The primary only answers
//! `Ack` once every replica it fanned the write out to has confirmed it, and
//! answers `Failed` when that does not happen within the operation deadline.
//!
//! # Architecture
//!
//! Every component is an actor: a tokio task that owns its state exclusively
//! and is driven by an unbounded mpsc inbox.
//!
//! - **Replica node**: owns the store and is either primary or secondary for its
//!   whole lifetime, as decided once by the arbiter
//! - **Replication link**: one per secondary, spawned by the primary; assigns
//!   sequence numbers and retransmits snapshots until they are acknowledged
//! - **Persistence gateway**: one per node; may silently drop confirmations,
//!   so the secondary keeps re-issuing outstanding requests
//! - **Arbiter**: tells nodes their role and pushes the replica set to the primary
//!
//! Waiting never blocks a task. Retries come from a [`timer::RetryTicker`] polled
//! in each actor's `select!` loop and deadlines are [`timer::Deadline`]s that
//! re-inject a message into the owner's inbox.
//!
//! # Modules
//!
//! - [`replica`]: the replica node state machine and its handle
//! - [`replicator`]: per-secondary replication link
//! - [`persistence`]: persistence gateway trait, reference gateways, actor
//! - [`arbiter`]: in-process membership arbiter
//! - [`client`]: request/reply client for a node
//! - [`cluster`]: helper wiring an arbiter and nodes together in one process
//! - [`message`]: every message exchanged between the actors
//! - [`store`]: the key-value map owned by a node
//! - [`timer`]: retry ticks and cancellable deadlines
//! - [`config`]: timing configuration
//! - [`protocol`]: console command parsing for the interactive binary
//! - [`cli`]: command-line flags for the binary

pub mod arbiter;
pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod message;
pub mod persistence;
pub mod protocol;
pub mod replica;
pub mod replicator;
pub mod store;
pub mod timer;

pub use client::Client;
pub use cluster::LocalCluster;
pub use config::ReplicaConfig;
pub use error::{ReplicaError, Result};
pub use message::{Operation, OperationReply, ReplicaId, ReplicaRef};
pub use replica::{spawn_replica, NodeStatus, ReplicaHandle, RoleKind};
