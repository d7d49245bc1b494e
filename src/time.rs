//! Conversions between stored instants (`Ms`) and restaurant-local wall-clock time.

use chrono::{
    DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeDelta, TimeZone, Timelike,
    Utc,
};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::{Ms, Span, SLOT_MINUTES};

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

pub fn parse_timezone(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::invalid(format!("unknown timezone: {name}")))
}

/// Interpret a stored instant in `tz`.
pub fn to_local(ms: Ms, tz: Tz) -> Result<DateTime<Tz>, EngineError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|utc| utc.with_timezone(&tz))
        .ok_or_else(|| EngineError::invalid(format!("instant out of range: {ms}")))
}

/// Parse a client-supplied start instant.
///
/// RFC 3339 with an offset is converted into `tz`; a bare local datetime is read
/// as wall-clock time in `tz` (earliest mapping when ambiguous).
pub fn parse_instant(input: &str, tz: Tz) -> Result<DateTime<Tz>, EngineError> {
    let input = input.trim();
    if let Ok(fixed) = DateTime::parse_from_rfc3339(input) {
        return Ok(fixed.with_timezone(&tz));
    }
    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M"))
        .map_err(|_| EngineError::invalid(format!("invalid datetime: {input}")))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| EngineError::invalid(format!("local time does not exist in {tz}: {input}")))
}

/// Strict `YYYY-MM-DD`.
pub fn parse_date(input: &str) -> Result<NaiveDate, EngineError> {
    let input = input.trim();
    if input.len() != 10 {
        return Err(EngineError::invalid(format!("invalid date: {input}")));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| EngineError::invalid(format!("invalid date: {input}")))
}

/// First existing local instant of `date`: midnight, or the first quarter-hour
/// after a DST gap that swallowed midnight.
pub fn local_day_start(date: NaiveDate, tz: Tz) -> Result<DateTime<Tz>, EngineError> {
    let mut naive = date.and_time(NaiveTime::MIN);
    for _ in 0..8 {
        if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
            return Ok(dt);
        }
        naive += TimeDelta::minutes(SLOT_MINUTES);
    }
    Err(EngineError::invalid(format!("no local midnight for {date} in {tz}")))
}

/// `[local midnight, next local midnight)` as stored instants.
pub fn local_day_span(date: NaiveDate, tz: Tz) -> Result<Span, EngineError> {
    let next = date
        .succ_opt()
        .ok_or_else(|| EngineError::invalid(format!("date out of range: {date}")))?;
    let start = local_day_start(date, tz)?.timestamp_millis();
    let end = local_day_start(next, tz)?.timestamp_millis();
    Ok(Span::new(start, end))
}

/// True when the local wall-clock time sits on the 15-minute grid.
pub fn is_on_grid(dt: &DateTime<Tz>) -> bool {
    dt.minute() as i64 % SLOT_MINUTES == 0 && dt.second() == 0 && dt.nanosecond() == 0
}

/// Zero-padded `HH:mm`.
pub fn hhmm(dt: &DateTime<Tz>) -> String {
    dt.format("%H:%M").to_string()
}

/// RFC 3339 in the restaurant's offset, whole seconds.
pub fn format_local(ms: Ms, tz: Tz) -> String {
    match to_local(ms, tz) {
        Ok(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, false),
        Err(_) => ms.to_string(),
    }
}
