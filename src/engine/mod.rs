mod booking;
mod catalog;
pub mod durable;
mod error;
mod ledger;
pub mod overlap;
mod queries;
mod serializer;
pub mod shifts;
pub mod slots;
pub mod store;
pub mod tables;
mod validate;

pub use booking::BookingRequest;
pub use durable::WalStore;
pub use error::{EngineError, Entity};
pub use ledger::IdempotencyLedger;
pub use serializer::{BookingSerializer, LockKey};
pub use store::{InMemoryStore, Store};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::info;

use crate::model::*;
use crate::time::parse_timezone;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on waiting for a slot's booking queue. `None` waits forever.
    pub queue_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_timeout: Some(Duration::from_millis(5_000)),
        }
    }
}

/// Availability and booking allocation for one tenant.
pub struct Engine {
    store: Arc<dyn Store>,
    /// Set when `store` is WAL-backed, for maintenance.
    durable: Option<Arc<WalStore>>,
    serializer: BookingSerializer,
    ledger: IdempotencyLedger,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            store,
            durable: None,
            serializer: BookingSerializer::new(config.queue_timeout),
            ledger: IdempotencyLedger::new(),
        }
    }

    /// Volatile engine backed by an `InMemoryStore`.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), config)
    }

    /// Durable engine replaying and appending to the WAL at `wal_path`.
    pub fn open(wal_path: &Path, config: EngineConfig) -> std::io::Result<Self> {
        let wal = Arc::new(WalStore::open(wal_path)?);
        let mut engine = Self::new(wal.clone(), config);
        engine.durable = Some(wal);
        Ok(engine)
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Forget lock queues and idempotency locks nobody is using.
    pub fn prune_idle(&self) -> (usize, usize) {
        (self.serializer.prune_idle(), self.ledger.prune_idle())
    }

    pub fn lock_queue_count(&self) -> usize {
        self.serializer.queue_count()
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        match &self.durable {
            Some(wal) => wal.appends_since_compact().await,
            None => 0,
        }
    }

    /// Compact the WAL once more than `threshold` events were appended since the
    /// last compaction. Returns whether it ran.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, EngineError> {
        let Some(wal) = &self.durable else {
            return Ok(false);
        };
        let appended = wal.appends_since_compact().await;
        if appended < threshold {
            return Ok(false);
        }
        wal.compact().await?;
        info!("compacted WAL after {appended} appends");
        Ok(true)
    }

    // ── Lookups shared by reads and writes ───────────────────

    /// Zone the restaurant's instants are rendered in.
    pub async fn timezone(&self, restaurant_id: &str) -> Result<Tz, EngineError> {
        Ok(self.restaurant_or_404(restaurant_id).await?.1)
    }

    async fn restaurant_or_404(&self, id: &str) -> Result<(Restaurant, Tz), EngineError> {
        let restaurant = self
            .store
            .restaurant(id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Restaurant, id))?;
        let tz = parse_timezone(&restaurant.timezone)?;
        Ok((restaurant, tz))
    }

    /// A sector that exists and belongs to `restaurant_id`.
    async fn sector_of(&self, restaurant_id: &str, sector_id: &str) -> Result<Sector, EngineError> {
        self.store
            .sector(sector_id)
            .await?
            .filter(|s| s.restaurant_id == restaurant_id)
            .ok_or_else(|| EngineError::not_found(Entity::Sector, sector_id))
    }
}
