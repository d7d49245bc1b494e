use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::model::{Booking, Reservation};
use crate::observability::IDEMPOTENT_REPLAYS_TOTAL;

use super::store::Store;
use super::EngineError;

/// Serializes work per idempotency key and replays bound keys.
///
/// The binding itself lives in the store next to the reservation it names. The
/// ledger only makes check-then-create atomic for requests sharing a key.
#[derive(Default)]
pub struct IdempotencyLedger {
    keys: DashMap<String, Arc<Mutex<()>>>,
}

impl IdempotencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to `key` until the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        slot.lock_owned().await
    }

    /// Return the reservation bound to `key`, or run `attempt` and report its result.
    ///
    /// `attempt` must create the reservation carrying `key`; a failure leaves the
    /// key unbound.
    pub async fn book_once<F, Fut>(
        &self,
        store: &dyn Store,
        key: &str,
        attempt: F,
    ) -> Result<Booking, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Reservation, EngineError>>,
    {
        let _guard = self.lock(key).await;
        if let Some(reservation) = store.reservation_by_idempotency_key(key).await? {
            metrics::counter!(IDEMPOTENT_REPLAYS_TOTAL).increment(1);
            info!("idempotent replay of {} for key {key:?}", reservation.id);
            return Ok(Booking {
                reservation,
                replayed: true,
            });
        }
        let reservation = attempt().await?;
        Ok(Booking {
            reservation,
            replayed: false,
        })
    }

    pub fn prune_idle(&self) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, slot| Arc::strong_count(slot) > 1);
        before.saturating_sub(self.keys.len())
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}
