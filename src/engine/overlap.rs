use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;

use crate::model::{Ms, Reservation, Span};

use super::EngineError;

/// A half-open `[start, end)` interval expressed in a restaurant's zone.
///
/// Both bounds are converted into the same zone on construction, so comparisons
/// never depend on the offset an instant was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedSpan {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl ZonedSpan {
    pub fn new<Z: TimeZone>(start: &DateTime<Z>, end: &DateTime<Z>, tz: Tz) -> Self {
        Self {
            start: start.with_timezone(&tz),
            end: end.with_timezone(&tz),
        }
    }

    pub fn from_span(span: Span, tz: Tz) -> Result<Self, EngineError> {
        Ok(Self {
            start: crate::time::to_local(span.start, tz)?,
            end: crate::time::to_local(span.end, tz)?,
        })
    }

    pub fn overlaps(&self, other: &ZonedSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn span(&self) -> Span {
        Span::new(self.start.timestamp_millis(), self.end.timestamp_millis())
    }
}

/// True if any CONFIRMED reservation holding `table_id` overlaps `candidate`.
pub fn table_is_occupied(
    table_id: &str,
    candidate: &ZonedSpan,
    reservations: &[Reservation],
    tz: Tz,
) -> Result<bool, EngineError> {
    for res in reservations {
        if !res.is_confirmed() || !res.holds_table(table_id) {
            continue;
        }
        if ZonedSpan::from_span(res.span, tz)?.overlaps(candidate) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reservations whose interval overlaps `[start, end)`, regardless of table.
pub fn overlapping<'a>(
    reservations: &'a [Reservation],
    start: Ms,
    end: Ms,
) -> impl Iterator<Item = &'a Reservation> {
    let window = Span::new(start, end);
    reservations
        .iter()
        .filter(move |r| r.is_confirmed() && r.span.overlaps(&window))
}
