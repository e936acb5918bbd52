//! Persistence gateway: the external durability mechanism of a node.
//!
//! A gateway either confirms a request or silently loses the confirmation. It
//! never reports a failure, so the secondary re-issues every outstanding
//! request on each retry tick until it is confirmed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::message::{NodeMessage, Persist, PersistenceRef};
use crate::store::KvStore;

pub trait PersistenceGateway: Send + 'static {
    /// Makes `request` durable. Returns `false` when the confirmation is lost.
    fn persist(&mut self, request: &Persist) -> bool;
}

impl<F> PersistenceGateway for F
where
    F: FnMut(&Persist) -> bool + Send + 'static,
{
    fn persist(&mut self, request: &Persist) -> bool {
        self(request)
    }
}

/// Confirms every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReliablePersistence;

impl PersistenceGateway for ReliablePersistence {
    fn persist(&mut self, _request: &Persist) -> bool {
        true
    }
}

/// Drops each confirmation with a fixed probability.
///
/// Every request is written to the durable map even when its confirmation is
/// then lost.
pub struct FlakyPersistence {
    drop_probability: f64,
    rng: StdRng,
    durable: KvStore,
}

impl FlakyPersistence {
    /// `drop_probability` is clamped into `0.0..=1.0`.
    pub fn new(drop_probability: f64, seed: u64) -> Self {
        Self {
            drop_probability: drop_probability.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            durable: KvStore::new(),
        }
    }

    pub fn durable(&self) -> &KvStore {
        &self.durable
    }
}

impl PersistenceGateway for FlakyPersistence {
    fn persist(&mut self, request: &Persist) -> bool {
        self.durable.apply(request.key.clone(), request.value.clone());
        !self.rng.gen_bool(self.drop_probability)
    }
}

/// Runs `gateway` as its own task and returns its inbox.
///
/// Confirmations are delivered to `owner` as [`NodeMessage::Persisted`]. The
/// task ends when the returned sender is dropped or the owner stops.
pub fn spawn_persistence<G>(
    mut gateway: G,
    owner: mpsc::UnboundedSender<NodeMessage>,
) -> PersistenceRef
where
    G: PersistenceGateway,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Persist>();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            if !gateway.persist(&request) {
                debug!(key = %request.key, seq = request.seq, "persistence confirmation lost");
                continue;
            }
            trace!(key = %request.key, seq = request.seq, "persisted");
            let confirmed = NodeMessage::Persisted {
                key: request.key,
                seq: request.seq,
            };
            if owner.send(confirmed).is_err() {
                break;
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn request(seq: u64) -> Persist {
        Persist {
            key: "a".into(),
            value: Some("1".into()),
            seq,
        }
    }

    #[tokio::test]
    async fn confirmed_requests_notify_owner() {
        let (owner_tx, mut owner_rx) = mpsc::unbounded_channel();
        let persistence = spawn_persistence(ReliablePersistence, owner_tx);

        persistence.send(request(3)).expect("gateway running");

        match owner_rx.recv().await {
            Some(NodeMessage::Persisted { key, seq }) => {
                assert_eq!(key, "a");
                assert_eq!(seq, 3);
            }
            other => panic!("expected persisted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lost_confirmations_produce_nothing() {
        let (owner_tx, mut owner_rx) = mpsc::unbounded_channel();
        let mut attempts = 0;
        let persistence = spawn_persistence(
            move |_: &Persist| {
                attempts += 1;
                attempts > 1
            },
            owner_tx,
        );

        persistence.send(request(0)).expect("gateway running");
        let first = tokio::time::timeout(Duration::from_millis(200), owner_rx.recv()).await;
        assert!(first.is_err(), "first confirmation should be dropped");

        persistence.send(request(0)).expect("gateway running");
        assert!(matches!(
            owner_rx.recv().await,
            Some(NodeMessage::Persisted { seq: 0, .. })
        ));
    }

    #[test]
    fn flaky_gateway_extremes() {
        let mut never = FlakyPersistence::new(1.0, 1);
        let mut always = FlakyPersistence::new(0.0, 1);
        for seq in 0..20 {
            assert!(!never.persist(&request(seq)));
            assert!(always.persist(&request(seq)));
        }
    }

    #[test]
    fn flaky_gateway_stores_requests_whose_confirmation_is_lost() {
        let mut gateway = FlakyPersistence::new(1.0, 3);
        assert!(!gateway.persist(&request(0)));
        assert_eq!(gateway.durable().get("a"), Some("1".to_string()));

        let removal = Persist {
            key: "a".into(),
            value: None,
            seq: 1,
        };
        assert!(!gateway.persist(&removal));
        assert!(gateway.durable().is_empty());
    }

    #[test]
    fn flaky_gateway_clamps_probability() {
        let mut gateway = FlakyPersistence::new(7.5, 1);
        assert!(!gateway.persist(&request(0)));
    }
}
