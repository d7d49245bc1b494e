use chrono::{DateTime, NaiveTime};
use chrono_tz::Tz;

use crate::limits::MAX_SHIFTS_PER_RESTAURANT;
use crate::model::Shift;
use crate::time::hhmm;

use super::EngineError;

/// Does `[start, end)` fit entirely inside at least one shift?
///
/// Both bounds are compared as zero-padded `HH:mm` strings in the restaurant's
/// zone. An empty shift list means unrestricted hours. A candidate that wraps past
/// midnight (end time-of-day before start time-of-day) never fits.
pub fn fits_any_shift(start: &DateTime<Tz>, end: &DateTime<Tz>, shifts: &[Shift]) -> bool {
    if shifts.is_empty() {
        return true;
    }
    let start_str = hhmm(start);
    let end_str = hhmm(end);
    if end_str < start_str {
        return false;
    }
    shifts
        .iter()
        .any(|s| start_str.as_str() >= s.start.as_str() && end_str.as_str() <= s.end.as_str())
}

/// Validate shift bounds on restaurant creation.
pub fn validate_shifts(shifts: &[Shift]) -> Result<(), EngineError> {
    if shifts.len() > MAX_SHIFTS_PER_RESTAURANT {
        return Err(EngineError::invalid("too many shifts"));
    }
    for shift in shifts {
        parse_hhmm(&shift.start)?;
        parse_hhmm(&shift.end)?;
        if shift.end <= shift.start {
            return Err(EngineError::invalid(format!(
                "shift {}-{} ends before it starts; midnight-crossing shifts are not supported",
                shift.start, shift.end
            )));
        }
    }
    Ok(())
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, EngineError> {
    if s.len() != 5 {
        return Err(EngineError::invalid(format!("shift time must be HH:mm: {s}")));
    }
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| EngineError::invalid(format!("shift time must be HH:mm: {s}")))
}
