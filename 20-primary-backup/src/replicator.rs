//! Replication link between the primary and one secondary.
//!
//! The primary hands every update to the link as a `Replicate`. The link gives
//! it the next sequence number for this secondary, sends a `Snapshot`, and keeps
//! resending every unacknowledged snapshot on each retry tick. A `SnapshotAck`
//! clears the entry and is reported back to the primary as `Replicated`.
//!
//! Resending is always safe because the secondary acknowledges sequences it has
//! already applied without applying them again.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::message::{Key, NodeMessage, ReplicaRef, ReplicatorMessage, ReplicatorRef, Value};
use crate::timer::RetryTicker;

/// Primary-side handle of a running link.
///
/// Dropping the handle aborts the link task, which cancels its retry ticker
/// and discards every unacknowledged snapshot.
pub struct ReplicatorHandle {
    tx: ReplicatorRef,
    task: JoinHandle<()>,
}

impl ReplicatorHandle {
    /// Starts a link to `replica`. Confirmations go to `primary`.
    pub fn spawn(
        replica: ReplicaRef,
        primary: mpsc::UnboundedSender<NodeMessage>,
        retry_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Replicator {
            replica,
            primary,
            inbox: rx,
            self_ref: tx.clone(),
            next_seq: 0,
            pending: BTreeMap::new(),
            ticker: RetryTicker::new(retry_interval),
        };
        let task = tokio::spawn(link.run());
        Self { tx, task }
    }

    pub fn replicate(&self, key: Key, value: Option<Value>, id: i64) {
        // A send only fails once the task is gone, in which case nobody waits on it.
        let _ = self.tx.send(ReplicatorMessage::Replicate { key, value, id });
    }

    /// Tears the link down. Unacknowledged snapshots are discarded.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ReplicatorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct PendingSnapshot {
    key: Key,
    value: Option<Value>,
    id: i64,
}

struct Replicator {
    replica: ReplicaRef,
    primary: mpsc::UnboundedSender<NodeMessage>,
    inbox: mpsc::UnboundedReceiver<ReplicatorMessage>,
    self_ref: ReplicatorRef,
    next_seq: u64,
    pending: BTreeMap<u64, PendingSnapshot>,
    ticker: RetryTicker,
}

impl Replicator {
    async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.inbox.recv() => {
                    let Some(message) = message else { break };
                    self.handle(message);
                }
                _ = self.ticker.tick() => self.resend_pending(),
            }
        }
    }

    fn handle(&mut self, message: ReplicatorMessage) {
        match message {
            ReplicatorMessage::Replicate { key, value, id } => self.replicate(key, value, id),
            ReplicatorMessage::SnapshotAck { key, seq } => self.acknowledge(key, seq),
        }
    }

    fn replicate(&mut self, key: Key, value: Option<Value>, id: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(replica = %self.replica.id(), seq, id, key = %key, "replicating");
        self.send_snapshot(seq, &key, &value);
        self.pending.insert(seq, PendingSnapshot { key, value, id });
    }

    fn acknowledge(&mut self, key: Key, seq: u64) {
        let Some(pending) = self.pending.remove(&seq) else {
            trace!(replica = %self.replica.id(), seq, "ignoring stale snapshot ack");
            return;
        };
        let _ = self.primary.send(NodeMessage::Replicated {
            replica: self.replica.id(),
            key,
            id: pending.id,
        });
    }

    fn resend_pending(&self) {
        for (seq, pending) in &self.pending {
            trace!(replica = %self.replica.id(), seq, "resending snapshot");
            self.send_snapshot(*seq, &pending.key, &pending.value);
        }
    }

    fn send_snapshot(&self, seq: u64, key: &Key, value: &Option<Value>) {
        let snapshot = NodeMessage::Snapshot {
            key: key.clone(),
            value: value.clone(),
            seq,
            reply_to: self.self_ref.clone(),
        };
        // An unreachable secondary is retried on the next tick.
        if self.replica.send(snapshot).is_err() {
            trace!(replica = %self.replica.id(), seq, "secondary unreachable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ReplicaId;

    struct LinkHarness {
        link: ReplicatorHandle,
        secondary_rx: mpsc::UnboundedReceiver<NodeMessage>,
        primary_rx: mpsc::UnboundedReceiver<NodeMessage>,
    }

    impl LinkHarness {
        fn new() -> Self {
            let (secondary_tx, secondary_rx) = mpsc::unbounded_channel();
            let (primary_tx, primary_rx) = mpsc::unbounded_channel();
            let replica = ReplicaRef::new(ReplicaId(2), secondary_tx);
            let link = ReplicatorHandle::spawn(replica, primary_tx, Duration::from_millis(100));
            Self {
                link,
                secondary_rx,
                primary_rx,
            }
        }

        async fn next_snapshot(&mut self) -> (Key, Option<Value>, u64, ReplicatorRef) {
            match self.secondary_rx.recv().await {
                Some(NodeMessage::Snapshot {
                    key,
                    value,
                    seq,
                    reply_to,
                }) => (key, value, seq, reply_to),
                other => panic!("expected snapshot, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn assigns_consecutive_sequence_numbers() {
        let mut harness = LinkHarness::new();
        harness.link.replicate("a".into(), Some("1".into()), 10);
        harness.link.replicate("b".into(), None, 11);

        let (key, value, seq, _) = harness.next_snapshot().await;
        assert_eq!((key.as_str(), value.as_deref(), seq), ("a", Some("1"), 0));
        let (key, value, seq, _) = harness.next_snapshot().await;
        assert_eq!((key.as_str(), value, seq), ("b", None, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn ack_is_reported_once_as_replicated() {
        let mut harness = LinkHarness::new();
        harness.link.replicate("a".into(), Some("1".into()), 10);
        let (_, _, seq, reply_to) = harness.next_snapshot().await;

        reply_to
            .send(ReplicatorMessage::SnapshotAck {
                key: "a".into(),
                seq,
            })
            .expect("link running");
        match harness.primary_rx.recv().await {
            Some(NodeMessage::Replicated { replica, key, id }) => {
                assert_eq!(replica, ReplicaId(2));
                assert_eq!(key, "a");
                assert_eq!(id, 10);
            }
            other => panic!("expected replicated, got {other:?}"),
        }

        // Duplicate and unknown acks are ignored.
        reply_to
            .send(ReplicatorMessage::SnapshotAck {
                key: "a".into(),
                seq,
            })
            .expect("link running");
        reply_to
            .send(ReplicatorMessage::SnapshotAck {
                key: "z".into(),
                seq: 99,
            })
            .expect("link running");
        let extra =
            tokio::time::timeout(Duration::from_millis(500), harness.primary_rx.recv()).await;
        assert!(extra.is_err(), "no further confirmations expected");
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_snapshots_are_resent_with_same_sequence() {
        let mut harness = LinkHarness::new();
        harness.link.replicate("a".into(), Some("1".into()), 1);
        harness.link.replicate("b".into(), Some("2".into()), 2);

        let (_, _, first, reply_to) = harness.next_snapshot().await;
        let (_, _, second, _) = harness.next_snapshot().await;
        reply_to
            .send(ReplicatorMessage::SnapshotAck {
                key: "a".into(),
                seq: first,
            })
            .expect("link running");

        // Only the unacknowledged snapshot comes back after the retry tick.
        let (key, _, seq, _) = harness.next_snapshot().await;
        assert_eq!((key.as_str(), seq), ("b", second));
        let (key, _, seq, _) = harness.next_snapshot().await;
        assert_eq!((key.as_str(), seq), ("b", second));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_link_stops_retrying() {
        let mut harness = LinkHarness::new();
        harness.link.replicate("a".into(), Some("1".into()), 1);
        let _ = harness.next_snapshot().await;

        harness.link.stop();

        // Once the task is gone every sender it held is dropped.
        let rest = tokio::time::timeout(Duration::from_secs(1), harness.secondary_rx.recv()).await;
        assert!(matches!(rest, Ok(None)));
    }
}
