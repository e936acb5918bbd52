//! Request/reply client for a single replica node.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::{ReplicaError, Result};
use crate::message::{ClientRef, NodeMessage, Operation, OperationReply, ReplicaRef, Value};

/// Sends operations to one node and matches replies by id.
///
/// Ids are assigned from a counter starting at 0. Replies for ids the client
/// is no longer waiting on are discarded.
pub struct Client {
    target: ReplicaRef,
    reply_tx: ClientRef,
    replies: mpsc::UnboundedReceiver<OperationReply>,
    next_id: i64,
    wait: Duration,
}

impl Client {
    /// `wait` bounds how long a request waits for its reply.
    pub fn new(target: ReplicaRef, wait: Duration) -> Self {
        let (reply_tx, replies) = mpsc::unbounded_channel();
        Self {
            target,
            reply_tx,
            replies,
            next_id: 0,
            wait,
        }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Sends `op` without waiting for the reply.
    pub fn send(&self, op: Operation) -> Result<()> {
        self.target.send(NodeMessage::Operation {
            op,
            reply_to: self.reply_tx.clone(),
        })
    }

    /// Next reply in arrival order, whatever its id. `None` if nothing arrives
    /// within the wait bound.
    pub async fn next_reply(&mut self) -> Result<Option<OperationReply>> {
        match time::timeout(self.wait, self.replies.recv()).await {
            Ok(Some(reply)) => Ok(Some(reply)),
            Ok(None) => Err(ReplicaError::NodeStopped(self.target.id())),
            Err(_) => Ok(None),
        }
    }

    /// Sends `op` and waits for the reply carrying the same id.
    pub async fn request(&mut self, op: Operation) -> Result<OperationReply> {
        let id = op.id();
        let deadline = Instant::now() + self.wait;
        self.send(op)?;
        loop {
            let reply = match time::timeout_at(deadline, self.replies.recv()).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return Err(ReplicaError::NodeStopped(self.target.id())),
                Err(_) => return Err(ReplicaError::NoReply(id)),
            };
            if reply.id() == id {
                return Ok(reply);
            }
            debug!(expected = id, received = reply.id(), "discarding stale reply");
        }
    }

    pub async fn get(&mut self, key: impl Into<String>) -> Result<Option<Value>> {
        let id = self.next_id();
        let reply = self
            .request(Operation::Get {
                key: key.into(),
                id,
            })
            .await?;
        match reply {
            OperationReply::GetResult { value, .. } => Ok(value),
            OperationReply::Failed { .. } => Err(ReplicaError::OperationFailed(id)),
            OperationReply::Ack { .. } => Err(ReplicaError::UnexpectedReply(id)),
        }
    }

    pub async fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let id = self.next_id();
        let reply = self
            .request(Operation::Insert {
                key: key.into(),
                value: value.into(),
                id,
            })
            .await?;
        expect_ack(reply, id)
    }

    pub async fn remove(&mut self, key: impl Into<String>) -> Result<()> {
        let id = self.next_id();
        let reply = self
            .request(Operation::Remove {
                key: key.into(),
                id,
            })
            .await?;
        expect_ack(reply, id)
    }
}

fn expect_ack(reply: OperationReply, id: i64) -> Result<()> {
    match reply {
        OperationReply::Ack { .. } => Ok(()),
        OperationReply::Failed { .. } => Err(ReplicaError::OperationFailed(id)),
        OperationReply::GetResult { .. } => Err(ReplicaError::UnexpectedReply(id)),
    }
}
