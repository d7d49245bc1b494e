use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the storage time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Grid granularity for reservation starts.
pub const SLOT_MINUTES: i64 = 15;

/// Fixed length of every reservation.
pub const DURATION_MINUTES: i64 = 90;

/// Number of slot starts in one restaurant-local day.
pub const SLOTS_PER_DAY: usize = 96;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// A reservation-length span starting at `start`.
    pub fn reservation(start: Ms) -> Self {
        Self::new(start, start + DURATION_MINUTES * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// A same-day service window, both bounds zero-padded `HH:mm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub start: String,
    pub end: String,
}

impl Shift {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    /// IANA zone name, validated on creation.
    pub timezone: String,
    pub shifts: Vec<Shift>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    pub id: String,
    pub restaurant_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub sector_id: String,
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
}

impl Table {
    /// Inclusive on both ends.
    pub fn fits(&self, party_size: u32) -> bool {
        self.min_size <= party_size && party_size <= self.max_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    /// Part of the data model; never produced by the engine.
    Pending,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub restaurant_id: String,
    pub sector_id: String,
    /// Always exactly one table today.
    pub table_ids: Vec<String>,
    pub party_size: u32,
    pub span: Span,
    pub status: ReservationStatus,
    pub customer: Customer,
    pub notes: Option<String>,
    /// Present while the reservation is CONFIRMED and was booked with a key.
    pub idempotency_key: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }

    pub fn holds_table(&self, table_id: &str) -> bool {
        self.table_ids.iter().any(|t| t == table_id)
    }
}

/// Everything the store needs to create a CONFIRMED reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub restaurant_id: String,
    pub sector_id: String,
    pub table_id: String,
    pub party_size: u32,
    pub span: Span,
    pub customer: Customer,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated(Restaurant),
    SectorCreated(Sector),
    TableCreated(Table),
    ReservationConfirmed(Reservation),
    /// Also releases the reservation's idempotency key.
    ReservationCancelled { id: Ulid, at: Ms },
}

/// Outcome of a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub reservation: Reservation,
    /// The idempotency key was already bound; nothing new was written.
    pub replayed: bool,
}

// ── Query result types ───────────────────────────────────────────

/// Why a slot cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotReason {
    Closed,
    NoCapacity,
}

impl SlotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotReason::Closed => "closed",
            SlotReason::NoCapacity => "no_capacity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Available { tables: Vec<String> },
    Unavailable(SlotReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub start: Ms,
    pub status: SlotStatus,
}

impl SlotInfo {
    pub fn is_available(&self) -> bool {
        matches!(self.status, SlotStatus::Available { .. })
    }

    pub fn tables(&self) -> &[String] {
        match &self.status {
            SlotStatus::Available { tables } => tables,
            SlotStatus::Unavailable(_) => &[],
        }
    }

    pub fn reason(&self) -> Option<SlotReason> {
        match self.status {
            SlotStatus::Available { .. } => None,
            SlotStatus::Unavailable(reason) => Some(reason),
        }
    }
}

/// Full answer to an availability query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub timezone: String,
    pub slot_minutes: i64,
    pub duration_minutes: i64,
    pub slots: Vec<SlotInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorInfo {
    pub id: String,
    pub restaurant_id: String,
    pub name: String,
    pub max_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyInfo {
    pub reservation_id: Ulid,
    pub customer_name: String,
    /// Restaurant-local `HH:mm`.
    pub time: String,
    pub party_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorPlanTable {
    pub table: Table,
    pub occupancy: Option<OccupancyInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorPlan {
    pub restaurant_id: String,
    pub sector_id: String,
    pub sector_name: String,
    pub timezone: String,
    pub reference: Ms,
    pub tables: Vec<FloorPlanTable>,
    pub slots: Vec<Ms>,
}
