use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::model::{Ms, MINUTE_MS};
use crate::observability::{BOOKING_QUEUE_WAIT_SECONDS, LOCK_QUEUES_ACTIVE};

use super::EngineError;

/// Identifies one booking queue: a sector and a slot start truncated to the minute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub sector_id: String,
    pub slot: Ms,
}

impl LockKey {
    pub fn new(sector_id: &str, start: Ms) -> Self {
        Self {
            sector_id: sector_id.to_string(),
            slot: start - start.rem_euclid(MINUTE_MS),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sector_id, self.slot)
    }
}

/// Runs booking bodies one at a time per `LockKey`, in arrival order.
///
/// Each key owns a FIFO-fair async mutex created on first use. Distinct keys never
/// contend. A waiter that gives up (timeout or its future being dropped) leaves the
/// queue without disturbing the order of the others, and a body that fails or
/// panics releases the key on the way out.
pub struct BookingSerializer {
    queues: DashMap<LockKey, Arc<Mutex<()>>>,
    wait_timeout: Option<Duration>,
}

impl BookingSerializer {
    pub fn new(wait_timeout: Option<Duration>) -> Self {
        Self {
            queues: DashMap::new(),
            wait_timeout,
        }
    }

    fn queue(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.queues
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for `key`'s turn, then drive `body` to completion while holding it.
    ///
    /// Only the wait is bounded; once `body` starts it is never interrupted here.
    pub async fn run<T, F>(&self, key: &LockKey, body: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let queue = self.queue(key);
        let waited = Instant::now();
        let _turn = match self.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, queue.lock_owned())
                .await
                .map_err(|_| {
                    warn!("booking queue {key} wait exceeded {}ms", limit.as_millis());
                    EngineError::QueueTimeout
                })?,
            None => queue.lock_owned().await,
        };
        metrics::histogram!(BOOKING_QUEUE_WAIT_SECONDS).record(waited.elapsed().as_secs_f64());
        body.await
    }

    /// Drop queues nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.queues.len();
        // Holders and waiters each keep a clone of the Arc.
        self.queues.retain(|_, queue| Arc::strong_count(queue) > 1);
        let after = self.queues.len();
        metrics::gauge!(LOCK_QUEUES_ACTIVE).set(after as f64);
        before.saturating_sub(after)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }
}
