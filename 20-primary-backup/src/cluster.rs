//! A whole cluster running inside one process: an arbiter plus nodes.
//!
//! Used by the binary and by the integration tests.

use std::collections::BTreeMap;

use tokio::task::JoinHandle;
use tracing::info;

use crate::arbiter::spawn_arbiter;
use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::message::{ArbiterMessage, ArbiterRef, ReplicaId};
use crate::persistence::PersistenceGateway;
use crate::replica::{spawn_replica, ReplicaHandle};

pub struct LocalCluster {
    config: ReplicaConfig,
    arbiter: ArbiterRef,
    arbiter_task: JoinHandle<()>,
    nodes: BTreeMap<ReplicaId, ReplicaHandle>,
    primary: Option<ReplicaId>,
    next_id: u64,
}

impl LocalCluster {
    pub fn new(config: ReplicaConfig) -> Result<Self> {
        config.validate()?;
        let (arbiter, arbiter_task) = spawn_arbiter();
        Ok(Self {
            config,
            arbiter,
            arbiter_task,
            nodes: BTreeMap::new(),
            primary: None,
            next_id: 1,
        })
    }

    pub fn config(&self) -> ReplicaConfig {
        self.config
    }

    /// Starts a node and lets it join. The first node becomes the primary.
    pub fn join<G>(&mut self, gateway: G) -> Result<ReplicaId>
    where
        G: PersistenceGateway,
    {
        let id = ReplicaId(self.next_id);
        self.next_id += 1;
        let handle = spawn_replica(id, self.config, &self.arbiter, gateway)?;
        self.nodes.insert(id, handle);
        self.primary.get_or_insert(id);
        Ok(id)
    }

    /// Removes a secondary from the replica set and stops it.
    pub async fn leave(&mut self, id: ReplicaId) -> Result<()> {
        if self.primary == Some(id) {
            return Err(ReplicaError::PrimaryCannotLeave(id));
        }
        let handle = self
            .nodes
            .remove(&id)
            .ok_or(ReplicaError::UnknownReplica(id))?;
        self.arbiter
            .send(ArbiterMessage::Leave(id))
            .map_err(|_| ReplicaError::ArbiterStopped)?;
        handle.shutdown().await?;
        info!(replica = %id, "node left the cluster");
        Ok(())
    }

    pub fn node(&self, id: ReplicaId) -> Result<&ReplicaHandle> {
        self.nodes.get(&id).ok_or(ReplicaError::UnknownReplica(id))
    }

    pub fn primary(&self) -> Result<&ReplicaHandle> {
        let id = self.primary.ok_or(ReplicaError::NoPrimary)?;
        self.node(id)
    }

    pub fn primary_id(&self) -> Option<ReplicaId> {
        self.primary
    }

    pub fn secondary_ids(&self) -> Vec<ReplicaId> {
        self.nodes
            .keys()
            .copied()
            .filter(|id| Some(*id) != self.primary)
            .collect()
    }

    pub async fn shutdown(self) -> Result<()> {
        for (_, handle) in self.nodes {
            handle.shutdown().await?;
        }
        drop(self.arbiter);
        let _ = self.arbiter_task.await;
        Ok(())
    }
}
