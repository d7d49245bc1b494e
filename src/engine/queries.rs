use ulid::Ulid;

use crate::model::*;
use crate::time::{hhmm, local_day_span, now_ms, parse_date, parse_instant, to_local};

use super::overlap::overlapping;
use super::slots::{availability_slots, potential_slots};
use super::validate::require_party_size;
use super::{Engine, EngineError, Entity};

impl Engine {
    /// One descriptor per 15-minute start of `date` for a party of `party_size`.
    pub async fn availability(
        &self,
        restaurant_id: &str,
        sector_id: &str,
        date: &str,
        party_size: u32,
    ) -> Result<Availability, EngineError> {
        require_party_size(party_size)?;
        let (restaurant, tz) = self.restaurant_or_404(restaurant_id).await?;
        let sector = self.sector_of(&restaurant.id, sector_id).await?;
        let date = parse_date(date)?;

        let candidates = self
            .store
            .tables_by_sector_and_capacity(&sector.id, party_size)
            .await?;
        let confirmed = self
            .store
            .confirmed_reservations(&restaurant.id, &sector.id)
            .await?;
        let slots = availability_slots(date, tz, &restaurant.shifts, &candidates, &confirmed)?;

        Ok(Availability {
            timezone: restaurant.timezone,
            slot_minutes: SLOT_MINUTES,
            duration_minutes: DURATION_MINUTES,
            slots,
        })
    }

    /// Starts of `date` whose full reservation fits a shift.
    pub async fn potential_slots(&self, restaurant_id: &str, date: &str) -> Result<Vec<Ms>, EngineError> {
        let (restaurant, tz) = self.restaurant_or_404(restaurant_id).await?;
        let date = parse_date(date)?;
        Ok(potential_slots(date, tz, &restaurant.shifts)?
            .iter()
            .map(|dt| dt.timestamp_millis())
            .collect())
    }

    pub async fn reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store
            .reservation(id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Reservation, id.to_string()))
    }

    /// Reservations of any status starting on the restaurant-local `date`.
    pub async fn reservations_for_day(
        &self,
        restaurant_id: &str,
        date: &str,
        sector_id: Option<&str>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let (restaurant, tz) = self.restaurant_or_404(restaurant_id).await?;
        if let Some(sector_id) = sector_id {
            self.sector_of(&restaurant.id, sector_id).await?;
        }
        let day = local_day_span(parse_date(date)?, tz)?;
        self.store
            .reservations_in_span(&restaurant.id, day, sector_id)
            .await
    }

    /// Which tables of a sector are taken during the 15 minutes from `at` (default: now).
    pub async fn floor_plan(
        &self,
        restaurant_id: &str,
        sector_id: &str,
        at: Option<&str>,
    ) -> Result<FloorPlan, EngineError> {
        let (restaurant, tz) = self.restaurant_or_404(restaurant_id).await?;
        let sector = self.sector_of(&restaurant.id, sector_id).await?;
        let reference = match at {
            Some(raw) => parse_instant(raw, tz)?,
            None => to_local(now_ms(), tz)?,
        };
        let from = reference.timestamp_millis();
        let until = from + SLOT_MINUTES * MINUTE_MS;

        let confirmed = self
            .store
            .confirmed_reservations(&restaurant.id, &sector.id)
            .await?;
        let current: Vec<&Reservation> = overlapping(&confirmed, from, until).collect();

        let mut tables = self.store.tables_by_sector(&sector.id).await?;
        tables.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let mut rows = Vec::with_capacity(tables.len());
        for table in tables {
            let occupancy = match current.iter().find(|r| r.holds_table(&table.id)) {
                Some(r) => Some(OccupancyInfo {
                    reservation_id: r.id,
                    customer_name: r.customer.name.clone(),
                    time: hhmm(&to_local(r.span.start, tz)?),
                    party_size: r.party_size,
                }),
                None => None,
            };
            rows.push(FloorPlanTable { table, occupancy });
        }

        let slots = potential_slots(reference.date_naive(), tz, &restaurant.shifts)?
            .iter()
            .map(|dt| dt.timestamp_millis())
            .collect();

        Ok(FloorPlan {
            restaurant_id: restaurant.id,
            sector_id: sector.id,
            sector_name: sector.name,
            timezone: restaurant.timezone,
            reference: from,
            tables: rows,
            slots,
        })
    }
}
