use chrono_tz::Tz;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::{MAX_CONTACT_LEN, MAX_NAME_LEN};
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, CANCELLATIONS_TOTAL};
use crate::time::{is_on_grid, parse_instant};

use super::overlap::{table_is_occupied, ZonedSpan};
use super::serializer::LockKey;
use super::shifts::fits_any_shift;
use super::slots::slot_window;
use super::validate::*;
use super::{Engine, EngineError, Entity};

/// A client's request to book a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub idempotency_key: String,
    pub restaurant_id: String,
    pub sector_id: String,
    pub party_size: u32,
    /// RFC 3339, or a local datetime read in the restaurant's zone.
    pub start: String,
    pub customer: Customer,
    pub notes: Option<String>,
}

impl BookingRequest {
    fn validate_fields(&self) -> Result<(), EngineError> {
        require_id("restaurant id", &self.restaurant_id)?;
        require_id("sector id", &self.sector_id)?;
        require_party_size(self.party_size)?;
        require_text("customer name", &self.customer.name, MAX_NAME_LEN)?;
        require_text("customer phone", &self.customer.phone, MAX_CONTACT_LEN)?;
        require_email(&self.customer.email)?;
        optional_notes(self.notes.as_deref())
    }
}

/// A request that passed validation and is ready to run under its lock key.
struct Attempt<'a> {
    request: &'a BookingRequest,
    key: &'a str,
    tz: Tz,
    window: ZonedSpan,
    candidates: Vec<Table>,
}

impl Engine {
    /// Book a table, or replay the reservation already bound to the request's key.
    pub async fn book(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let key = require_idempotency_key(&request.idempotency_key)?;
        let outcome = self
            .ledger
            .book_once(self.store.as_ref(), key, || self.book_fresh(&request, key))
            .await;

        let label = match &outcome {
            Ok(b) if b.replayed => "replayed",
            Ok(_) => "created",
            Err(e) => e.code(),
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => label).increment(1);
        outcome
    }

    async fn book_fresh(&self, request: &BookingRequest, key: &str) -> Result<Reservation, EngineError> {
        request.validate_fields()?;
        let (restaurant, tz) = self.restaurant_or_404(&request.restaurant_id).await?;
        let sector = self.sector_of(&restaurant.id, &request.sector_id).await?;

        let start = parse_instant(&request.start, tz)?;
        if !is_on_grid(&start) {
            return Err(EngineError::invalid(format!(
                "start {} is not on the {SLOT_MINUTES}-minute grid",
                request.start
            )));
        }
        let window = slot_window(&start);
        if !fits_any_shift(&window.start, &window.end, &restaurant.shifts) {
            debug!("refusing {} for {}: outside shifts", request.start, restaurant.id);
            return Err(EngineError::OutOfWindow);
        }

        let candidates = self
            .store
            .tables_by_sector_and_capacity(&sector.id, request.party_size)
            .await?;
        if candidates.is_empty() {
            debug!("no table in {} seats {}", sector.id, request.party_size);
            return Err(EngineError::NoCapacity);
        }

        let lock_key = LockKey::new(&sector.id, start.timestamp_millis());
        let attempt = Attempt {
            request,
            key,
            tz,
            window,
            candidates,
        };
        let reservation = self
            .serializer
            .run(&lock_key, self.attempt_booking(attempt))
            .await?;
        info!(
            "booked {} on table {} ({lock_key}) for {}",
            reservation.id,
            reservation.table_ids.join(","),
            request.party_size
        );
        Ok(reservation)
    }

    /// Runs with exclusive hold of the slot's lock key.
    async fn attempt_booking(&self, attempt: Attempt<'_>) -> Result<Reservation, EngineError> {
        let Attempt {
            request,
            key,
            tz,
            window,
            candidates,
        } = attempt;
        let span = window.span();

        if let Some(existing) = self
            .store
            .find_duplicate(
                &request.restaurant_id,
                &request.sector_id,
                span.start,
                &request.customer.email,
                &request.customer.phone,
            )
            .await?
        {
            debug!("duplicate of {} for {}", existing.id, request.customer.email);
            return Err(EngineError::DuplicateBooking);
        }

        let confirmed = self
            .store
            .confirmed_reservations(&request.restaurant_id, &request.sector_id)
            .await?;
        for table in &candidates {
            if table_is_occupied(&table.id, &window, &confirmed, tz)? {
                continue;
            }
            let new = NewReservation {
                restaurant_id: request.restaurant_id.clone(),
                sector_id: request.sector_id.clone(),
                table_id: table.id.clone(),
                party_size: request.party_size,
                span,
                customer: request.customer.clone(),
                notes: request.notes.clone(),
                idempotency_key: Some(key.to_string()),
            };
            match self.store.create_reservation(new).await {
                Ok(reservation) => return Ok(reservation),
                // Claimed meanwhile by an overlapping booking queued under another slot.
                Err(EngineError::NoCapacity) => continue,
                Err(e) => return Err(e),
            }
        }
        debug!(
            "all {} candidate tables taken in {} at {}",
            candidates.len(),
            request.sector_id,
            request.start
        );
        Err(EngineError::NoCapacity)
    }

    /// Cancel a CONFIRMED reservation and release its idempotency key.
    pub async fn cancel(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let missing = || EngineError::not_found(Entity::Reservation, id.to_string());
        let current = self
            .store
            .reservation(id)
            .await?
            .filter(Reservation::is_confirmed)
            .ok_or_else(missing)?;

        // Bookings under the same key wait until the cancellation lands.
        let _key_guard = match &current.idempotency_key {
            Some(key) => Some(self.ledger.lock(key).await),
            None => None,
        };

        let cancelled = match self
            .store
            .update_status(id, ReservationStatus::Cancelled)
            .await
        {
            Ok(r) => r,
            // Lost a race with another cancel.
            Err(EngineError::InvalidInput(_)) => return Err(missing()),
            Err(e) => return Err(e),
        };
        metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
        info!("cancelled {id} (table {})", cancelled.table_ids.join(","));
        Ok(cancelled)
    }
}
