use std::io;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::model::Event;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::store::{EventSink, EventStore};
use super::EngineError;

/// Store whose events are fsynced to a WAL before they become visible.
pub type WalStore = EventStore<WalSink>;

// ── Group-commit WAL channel ─────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that are already queued when one arrives are written
/// together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<Pending> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    info!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("WAL flush of {} events failed: {e}", batch.len());
        // Every caller hears Err, so none of the batch may survive a replay.
        if let Err(e) = wal.rollback() {
            error!("WAL rollback of {} failed: {e}", wal.path().display());
        }
    }
    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

fn writer_gone() -> EngineError {
    EngineError::Storage("WAL writer shut down".into())
}

/// Handle to the background WAL writer.
pub struct WalSink {
    tx: mpsc::Sender<WalCommand>,
}

impl WalSink {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).await.map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())
    }
}

#[async_trait]
impl EventSink for WalSink {
    async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        let event = event.clone();
        self.request(|response| WalCommand::Append { event, response })
            .await?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }
}

impl EventStore<WalSink> {
    /// Replay `path` into memory and start its writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));

        let store = Self::with_sink(WalSink { tx });
        store.restore(&events);
        info!("replayed {} events from {}", events.len(), path.display());
        Ok(store)
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let _quiet = self.quiesce().await;
        let events = self.state().snapshot_events();
        self.sink()
            .request(|response| WalCommand::Compact { events, response })
            .await?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.sink()
            .request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::Store;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatline_test_durable");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn seed(store: &WalStore) {
        store
            .create_restaurant(Restaurant {
                id: "R1".into(),
                name: "Bistro Central".into(),
                timezone: "UTC".into(),
                shifts: vec![],
            })
            .await
            .unwrap();
        store
            .create_sector(Sector {
                id: "S1".into(),
                restaurant_id: "R1".into(),
                name: "Main Hall".into(),
            })
            .await
            .unwrap();
        store
            .create_table(Table {
                id: "T1".into(),
                sector_id: "S1".into(),
                name: "T1".into(),
                min_size: 1,
                max_size: 4,
            })
            .await
            .unwrap();
    }

    fn booking(start: Ms, key: &str) -> NewReservation {
        NewReservation {
            restaurant_id: "R1".into(),
            sector_id: "S1".into(),
            table_id: "T1".into(),
            party_size: 2,
            span: Span::reservation(start),
            customer: Customer {
                name: "Ana".into(),
                phone: "555".into(),
                email: "ana@example.com".into(),
            },
            notes: Some("window seat".into()),
            idempotency_key: Some(key.into()),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_flush_fails_every_caller() {
        let mut wal = Wal::open(Path::new("/dev/full")).unwrap();
        let mut batch = Vec::new();
        let mut replies = Vec::new();
        for id in ["R1", "R2", "R3"] {
            let (tx, rx) = oneshot::channel();
            let event = Event::RestaurantCreated(Restaurant {
                id: id.into(),
                name: id.into(),
                timezone: "UTC".into(),
                shifts: vec![],
            });
            batch.push((event, tx));
            replies.push(rx);
        }
        commit_batch(&mut wal, batch);
        for mut rx in replies {
            assert!(rx.try_recv().unwrap().is_err());
        }
        assert_eq!(wal.appends_since_compact(), 0);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let (kept, cancelled) = {
            let store = WalStore::open(&path).unwrap();
            seed(&store).await;
            let kept = store.create_reservation(booking(0, "k1")).await.unwrap();
            let cancelled = store
                .create_reservation(booking(4 * 90 * MINUTE_MS, "k2"))
                .await
                .unwrap();
            store
                .update_status(cancelled.id, ReservationStatus::Cancelled)
                .await
                .unwrap();
            (kept, cancelled.id)
        };

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.reservation(kept.id).await.unwrap(), Some(kept.clone()));
        let c = store.reservation(cancelled).await.unwrap().unwrap();
        assert_eq!(c.status, ReservationStatus::Cancelled);
        assert_eq!(
            store.reservation_by_idempotency_key("k1").await.unwrap().map(|r| r.id),
            Some(kept.id)
        );
        assert!(store.reservation_by_idempotency_key("k2").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_group_commit() {
        let path = test_wal_path("group_commit.wal");
        let store = std::sync::Arc::new(WalStore::open(&path).unwrap());
        seed(&store).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_restaurant(Restaurant {
                        id: format!("R-{i}"),
                        name: format!("Place {i}"),
                        timezone: "UTC".into(),
                        shifts: vec![],
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.appends_since_compact().await, 19);
        assert_eq!(Wal::replay(&path).unwrap().len(), 19);
    }

    #[tokio::test]
    async fn compaction_keeps_state_and_resets_counter() {
        let path = test_wal_path("compact.wal");
        {
            let store = WalStore::open(&path).unwrap();
            seed(&store).await;
            for i in 0..5 {
                let r = store
                    .create_reservation(booking(0, &format!("k{i}")))
                    .await
                    .unwrap();
                store.update_status(r.id, ReservationStatus::Cancelled).await.unwrap();
            }
            assert_eq!(store.appends_since_compact().await, 13);
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
            store.create_reservation(booking(0, "final")).await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        let day = Span::new(0, 24 * 60 * MINUTE_MS);
        let all = store.reservations_in_span("R1", day, None).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all.iter().filter(|r| r.is_confirmed()).count(), 1);
        assert!(store.reservation_by_idempotency_key("final").await.unwrap().is_some());
    }
}
