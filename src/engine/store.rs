use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use ulid::Ulid;

use crate::limits::MAX_TABLES_PER_SECTOR;
use crate::model::*;
use crate::time::now_ms;

use super::error::{EngineError, Entity};
use super::tables::candidate_tables;

/// Everything the engine reads from or writes to persistent state.
///
/// Reads return snapshots; no method hands out references into the store.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Catalog ──────────────────────────────────────────────

    async fn restaurant(&self, id: &str) -> Result<Option<Restaurant>, EngineError>;
    async fn sector(&self, id: &str) -> Result<Option<Sector>, EngineError>;
    async fn restaurants(&self) -> Result<Vec<Restaurant>, EngineError>;
    async fn sectors_by_restaurant(&self, restaurant_id: &str) -> Result<Vec<Sector>, EngineError>;
    async fn tables_by_sector(&self, sector_id: &str) -> Result<Vec<Table>, EngineError>;
    /// Tables with `min_size <= party_size <= max_size`, smallest `max_size` first.
    async fn tables_by_sector_and_capacity(
        &self,
        sector_id: &str,
        party_size: u32,
    ) -> Result<Vec<Table>, EngineError>;

    async fn create_restaurant(&self, restaurant: Restaurant) -> Result<(), EngineError>;
    async fn create_sector(&self, sector: Sector) -> Result<(), EngineError>;
    async fn create_table(&self, table: Table) -> Result<(), EngineError>;

    // ── Reservations ─────────────────────────────────────────

    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, EngineError>;
    async fn confirmed_reservations(
        &self,
        restaurant_id: &str,
        sector_id: &str,
    ) -> Result<Vec<Reservation>, EngineError>;
    /// CONFIRMED reservation currently bound to `key`.
    async fn reservation_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Reservation>, EngineError>;
    /// CONFIRMED reservation at exactly `start` whose customer shares the email or phone.
    async fn find_duplicate(
        &self,
        restaurant_id: &str,
        sector_id: &str,
        start: Ms,
        email: &str,
        phone: &str,
    ) -> Result<Option<Reservation>, EngineError>;
    /// Reservations of any status starting inside `span`, ordered by start.
    async fn reservations_in_span(
        &self,
        restaurant_id: &str,
        span: Span,
        sector_id: Option<&str>,
    ) -> Result<Vec<Reservation>, EngineError>;

    /// Insert a CONFIRMED reservation on `new.table_id`.
    ///
    /// Fails with `NoCapacity` if that table already holds an overlapping
    /// CONFIRMED reservation.
    async fn create_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError>;
    async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError>;
}

// ── Materialized state ───────────────────────────────────────

/// Indexed in-memory state rebuilt from events.
#[derive(Default)]
pub struct MemoryState {
    restaurants: DashMap<String, Restaurant>,
    sectors: DashMap<String, Sector>,
    tables: DashMap<String, Table>,
    restaurant_sectors: DashMap<String, Vec<String>>,
    sector_tables: DashMap<String, Vec<String>>,
    reservations: DashMap<Ulid, Reservation>,
    sector_reservations: DashMap<String, Vec<Ulid>>,
    restaurant_reservations: DashMap<String, Vec<Ulid>>,
    idempotency: DashMap<String, Ulid>,
}

impl MemoryState {
    pub fn apply(&self, event: &Event) {
        match event {
            Event::RestaurantCreated(r) => {
                self.restaurants.insert(r.id.clone(), r.clone());
            }
            Event::SectorCreated(s) => {
                if self.sectors.insert(s.id.clone(), s.clone()).is_none() {
                    self.restaurant_sectors
                        .entry(s.restaurant_id.clone())
                        .or_default()
                        .push(s.id.clone());
                }
            }
            Event::TableCreated(t) => {
                if self.tables.insert(t.id.clone(), t.clone()).is_none() {
                    self.sector_tables
                        .entry(t.sector_id.clone())
                        .or_default()
                        .push(t.id.clone());
                }
            }
            Event::ReservationConfirmed(r) => {
                if let Some(key) = &r.idempotency_key
                    && r.is_confirmed()
                {
                    self.idempotency.insert(key.clone(), r.id);
                }
                if self.reservations.insert(r.id, r.clone()).is_none() {
                    self.sector_reservations
                        .entry(r.sector_id.clone())
                        .or_default()
                        .push(r.id);
                    self.restaurant_reservations
                        .entry(r.restaurant_id.clone())
                        .or_default()
                        .push(r.id);
                }
            }
            Event::ReservationCancelled { id, at } => {
                let stale_key = self.reservations.get_mut(id).and_then(|mut r| {
                    r.status = ReservationStatus::Cancelled;
                    r.updated_at = *at;
                    r.idempotency_key.take()
                });
                if let Some(key) = stale_key {
                    self.idempotency.remove_if(&key, |_, bound| bound == id);
                }
            }
        }
    }

    /// Minimal event sequence that rebuilds the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut restaurants: Vec<Restaurant> =
            self.restaurants.iter().map(|e| e.value().clone()).collect();
        restaurants.sort_by(|a, b| a.id.cmp(&b.id));
        let mut sectors: Vec<Sector> = self.sectors.iter().map(|e| e.value().clone()).collect();
        sectors.sort_by(|a, b| a.id.cmp(&b.id));
        let mut tables: Vec<Table> = self.tables.iter().map(|e| e.value().clone()).collect();
        tables.sort_by(|a, b| a.id.cmp(&b.id));
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);

        let mut events = Vec::with_capacity(
            restaurants.len() + sectors.len() + tables.len() + reservations.len(),
        );
        events.extend(restaurants.into_iter().map(Event::RestaurantCreated));
        events.extend(sectors.into_iter().map(Event::SectorCreated));
        events.extend(tables.into_iter().map(Event::TableCreated));
        for mut r in reservations {
            if r.is_confirmed() {
                events.push(Event::ReservationConfirmed(r));
                continue;
            }
            let (id, at) = (r.id, r.updated_at);
            r.status = ReservationStatus::Confirmed;
            r.updated_at = r.created_at;
            events.push(Event::ReservationConfirmed(r));
            events.push(Event::ReservationCancelled { id, at });
        }
        events
    }

    fn collect(&self, ids: &[Ulid]) -> Vec<Reservation> {
        ids.iter()
            .filter_map(|id| self.reservations.get(id).map(|r| r.value().clone()))
            .collect()
    }

    fn ids(index: &DashMap<String, Vec<Ulid>>, key: &str) -> Vec<Ulid> {
        index.get(key).map(|e| e.value().clone()).unwrap_or_default()
    }

    fn tables_of(&self, sector_id: &str) -> Vec<Table> {
        let ids = self
            .sector_tables
            .get(sector_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.tables.get(id).map(|t| t.value().clone()))
            .collect()
    }

    fn confirmed(&self, restaurant_id: &str, sector_id: &str) -> Vec<Reservation> {
        let ids = Self::ids(&self.sector_reservations, sector_id);
        self.collect(&ids)
            .into_iter()
            .filter(|r| r.is_confirmed() && r.restaurant_id == restaurant_id)
            .collect()
    }

    // ── Write validation ─────────────────────────────────────

    fn check_restaurant(&self, r: &Restaurant) -> Result<(), EngineError> {
        if self.restaurants.contains_key(&r.id) {
            return Err(EngineError::AlreadyExists {
                kind: Entity::Restaurant,
                id: r.id.clone(),
            });
        }
        Ok(())
    }

    fn check_sector(&self, s: &Sector) -> Result<(), EngineError> {
        if self.sectors.contains_key(&s.id) {
            return Err(EngineError::AlreadyExists {
                kind: Entity::Sector,
                id: s.id.clone(),
            });
        }
        if !self.restaurants.contains_key(&s.restaurant_id) {
            return Err(EngineError::not_found(Entity::Restaurant, &s.restaurant_id));
        }
        Ok(())
    }

    fn check_table(&self, t: &Table) -> Result<(), EngineError> {
        if self.tables.contains_key(&t.id) {
            return Err(EngineError::AlreadyExists {
                kind: Entity::Table,
                id: t.id.clone(),
            });
        }
        if !self.sectors.contains_key(&t.sector_id) {
            return Err(EngineError::not_found(Entity::Sector, &t.sector_id));
        }
        let count = self.sector_tables.get(&t.sector_id).map_or(0, |v| v.len());
        if count >= MAX_TABLES_PER_SECTOR {
            return Err(EngineError::invalid(format!(
                "sector {} already has {MAX_TABLES_PER_SECTOR} tables",
                t.sector_id
            )));
        }
        Ok(())
    }

    fn build_reservation(&self, new: NewReservation, now: Ms) -> Result<Reservation, EngineError> {
        if !self.tables.contains_key(&new.table_id) {
            return Err(EngineError::not_found(Entity::Table, &new.table_id));
        }
        let taken = self
            .confirmed(&new.restaurant_id, &new.sector_id)
            .iter()
            .any(|r| r.holds_table(&new.table_id) && r.span.overlaps(&new.span));
        if taken {
            return Err(EngineError::NoCapacity);
        }
        if let Some(key) = &new.idempotency_key
            && self.idempotency.contains_key(key)
        {
            return Err(EngineError::AlreadyExists {
                kind: Entity::Reservation,
                id: key.clone(),
            });
        }
        Ok(Reservation {
            id: Ulid::new(),
            restaurant_id: new.restaurant_id,
            sector_id: new.sector_id,
            table_ids: vec![new.table_id],
            party_size: new.party_size,
            span: new.span,
            status: ReservationStatus::Confirmed,
            customer: new.customer,
            notes: new.notes,
            idempotency_key: new.idempotency_key,
            created_at: now,
            updated_at: now,
        })
    }
}

// ── Event sinks ──────────────────────────────────────────────

/// Where committed events go before they are applied to memory.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn persist(&self, event: &Event) -> Result<(), EngineError>;
}

/// Discards events; state lives only as long as the process.
pub struct Volatile;

#[async_trait]
impl EventSink for Volatile {
    async fn persist(&self, _event: &Event) -> Result<(), EngineError> {
        Ok(())
    }
}

// ── Event-sourced store ──────────────────────────────────────

/// `Store` over `MemoryState`, persisting each event to `K` before applying it.
pub struct EventStore<K> {
    state: MemoryState,
    sink: K,
    /// Writers share it; compaction takes it exclusively.
    gate: RwLock<()>,
    catalog_writes: Mutex<()>,
    sector_writes: DashMap<String, Arc<Mutex<()>>>,
}

pub type InMemoryStore = EventStore<Volatile>;

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_sink(Volatile)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EventSink> EventStore<K> {
    pub fn with_sink(sink: K) -> Self {
        Self {
            state: MemoryState::default(),
            sink,
            gate: RwLock::new(()),
            catalog_writes: Mutex::new(()),
            sector_writes: DashMap::new(),
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn state(&self) -> &MemoryState {
        &self.state
    }

    /// Apply already-durable events, e.g. from WAL replay.
    pub fn restore(&self, events: &[Event]) {
        for event in events {
            self.state.apply(event);
        }
    }

    /// Block all writers for the lifetime of the guard.
    pub async fn quiesce(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    fn sector_lock(&self, sector_id: &str) -> Arc<Mutex<()>> {
        self.sector_writes
            .entry(sector_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn commit(&self, event: Event) -> Result<(), EngineError> {
        self.sink.persist(&event).await?;
        self.state.apply(&event);
        Ok(())
    }

    async fn commit_catalog(
        &self,
        check: impl FnOnce(&MemoryState) -> Result<(), EngineError>,
        event: Event,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _guard = self.catalog_writes.lock().await;
        check(&self.state)?;
        self.commit(event).await
    }

    fn existing(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.state
            .reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| EngineError::not_found(Entity::Reservation, id.to_string()))
    }
}

#[async_trait]
impl<K: EventSink> Store for EventStore<K> {
    async fn restaurant(&self, id: &str) -> Result<Option<Restaurant>, EngineError> {
        Ok(self.state.restaurants.get(id).map(|r| r.value().clone()))
    }

    async fn sector(&self, id: &str) -> Result<Option<Sector>, EngineError> {
        Ok(self.state.sectors.get(id).map(|s| s.value().clone()))
    }

    async fn restaurants(&self) -> Result<Vec<Restaurant>, EngineError> {
        let mut all: Vec<Restaurant> =
            self.state.restaurants.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn sectors_by_restaurant(&self, restaurant_id: &str) -> Result<Vec<Sector>, EngineError> {
        let ids = self
            .state
            .restaurant_sectors
            .get(restaurant_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut sectors: Vec<Sector> = ids
            .iter()
            .filter_map(|id| self.state.sectors.get(id).map(|s| s.value().clone()))
            .collect();
        sectors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sectors)
    }

    async fn tables_by_sector(&self, sector_id: &str) -> Result<Vec<Table>, EngineError> {
        Ok(self.state.tables_of(sector_id))
    }

    async fn tables_by_sector_and_capacity(
        &self,
        sector_id: &str,
        party_size: u32,
    ) -> Result<Vec<Table>, EngineError> {
        Ok(candidate_tables(&self.state.tables_of(sector_id), party_size))
    }

    async fn create_restaurant(&self, restaurant: Restaurant) -> Result<(), EngineError> {
        let check = restaurant.clone();
        self.commit_catalog(
            move |s| s.check_restaurant(&check),
            Event::RestaurantCreated(restaurant),
        )
        .await
    }

    async fn create_sector(&self, sector: Sector) -> Result<(), EngineError> {
        let check = sector.clone();
        self.commit_catalog(move |s| s.check_sector(&check), Event::SectorCreated(sector))
            .await
    }

    async fn create_table(&self, table: Table) -> Result<(), EngineError> {
        let check = table.clone();
        self.commit_catalog(move |s| s.check_table(&check), Event::TableCreated(table))
            .await
    }

    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        Ok(self.state.reservations.get(&id).map(|r| r.value().clone()))
    }

    async fn confirmed_reservations(
        &self,
        restaurant_id: &str,
        sector_id: &str,
    ) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.state.confirmed(restaurant_id, sector_id))
    }

    async fn reservation_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Reservation>, EngineError> {
        let Some(id) = self.state.idempotency.get(key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self
            .state
            .reservations
            .get(&id)
            .map(|r| r.value().clone())
            .filter(Reservation::is_confirmed))
    }

    async fn find_duplicate(
        &self,
        restaurant_id: &str,
        sector_id: &str,
        start: Ms,
        email: &str,
        phone: &str,
    ) -> Result<Option<Reservation>, EngineError> {
        Ok(self
            .state
            .confirmed(restaurant_id, sector_id)
            .into_iter()
            .find(|r| {
                r.span.start == start && (r.customer.email == email || r.customer.phone == phone)
            }))
    }

    async fn reservations_in_span(
        &self,
        restaurant_id: &str,
        span: Span,
        sector_id: Option<&str>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let ids = MemoryState::ids(&self.state.restaurant_reservations, restaurant_id);
        let mut found: Vec<Reservation> = self
            .state
            .collect(&ids)
            .into_iter()
            .filter(|r| span.contains_instant(r.span.start))
            .filter(|r| sector_id.is_none_or(|s| r.sector_id == s))
            .collect();
        found.sort_by_key(|r| (r.span.start, r.id));
        Ok(found)
    }

    async fn create_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        let _gate = self.gate.read().await;
        let lock = self.sector_lock(&new.sector_id);
        let _guard = lock.lock().await;
        let reservation = self.state.build_reservation(new, now_ms())?;
        self.commit(Event::ReservationConfirmed(reservation.clone()))
            .await?;
        Ok(reservation)
    }

    async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.gate.read().await;
        let sector_id = self.existing(id)?.sector_id;
        let lock = self.sector_lock(&sector_id);
        let _guard = lock.lock().await;

        let current = self.existing(id)?;
        if status != ReservationStatus::Cancelled || !current.is_confirmed() {
            return Err(EngineError::invalid(format!(
                "cannot move reservation {id} from {} to {}",
                current.status.as_str(),
                status.as_str()
            )));
        }
        self.commit(Event::ReservationCancelled { id, at: now_ms() })
            .await?;
        self.existing(id)
    }
}
