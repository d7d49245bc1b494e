use chrono::{DateTime, NaiveDate, TimeDelta};
use chrono_tz::Tz;

use crate::model::*;
use crate::time::local_day_start;

use super::overlap::{table_is_occupied, ZonedSpan};
use super::shifts::fits_any_shift;
use super::EngineError;

/// The day's 96 candidate starts, 15 minutes apart from local midnight.
pub fn day_grid(date: NaiveDate, tz: Tz) -> Result<Vec<DateTime<Tz>>, EngineError> {
    let day_start = local_day_start(date, tz)?;
    Ok((0..SLOTS_PER_DAY as i64)
        .map(|i| day_start + TimeDelta::minutes(i * SLOT_MINUTES))
        .collect())
}

/// Reservation window for a slot start.
pub fn slot_window(start: &DateTime<Tz>) -> ZonedSpan {
    let end = *start + TimeDelta::minutes(DURATION_MINUTES);
    ZonedSpan {
        start: *start,
        end,
    }
}

/// Grid starts whose full reservation window fits a shift.
pub fn potential_slots(
    date: NaiveDate,
    tz: Tz,
    shifts: &[Shift],
) -> Result<Vec<DateTime<Tz>>, EngineError> {
    Ok(day_grid(date, tz)?
        .into_iter()
        .filter(|start| {
            let window = slot_window(start);
            fits_any_shift(&window.start, &window.end, shifts)
        })
        .collect())
}

/// One descriptor per grid start, in chronological order.
///
/// `candidates` must already be the capacity-fitting tables in assignment order;
/// `reservations` are the sector's CONFIRMED reservations.
pub fn availability_slots(
    date: NaiveDate,
    tz: Tz,
    shifts: &[Shift],
    candidates: &[Table],
    reservations: &[Reservation],
) -> Result<Vec<SlotInfo>, EngineError> {
    let mut slots = Vec::with_capacity(SLOTS_PER_DAY);
    for start in day_grid(date, tz)? {
        let window = slot_window(&start);
        let status = if !fits_any_shift(&window.start, &window.end, shifts) {
            SlotStatus::Unavailable(SlotReason::Closed)
        } else if candidates.is_empty() {
            SlotStatus::Unavailable(SlotReason::NoCapacity)
        } else {
            let mut free = Vec::new();
            for table in candidates {
                if !table_is_occupied(&table.id, &window, reservations, tz)? {
                    free.push(table.id.clone());
                }
            }
            if free.is_empty() {
                SlotStatus::Unavailable(SlotReason::NoCapacity)
            } else {
                SlotStatus::Available { tables: free }
            }
        };
        slots.push(SlotInfo {
            start: start.timestamp_millis(),
            status,
        });
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{hhmm, parse_date, parse_instant};
    use ulid::Ulid;

    const BA: Tz = chrono_tz::America::Argentina::Buenos_Aires;

    fn table(id: &str, min: u32, max: u32) -> Table {
        Table {
            id: id.into(),
            sector_id: "S1".into(),
            name: id.into(),
            min_size: min,
            max_size: max,
        }
    }

    fn booked(table: &str, start: &str) -> Reservation {
        let s = parse_instant(start, BA).unwrap().timestamp_millis();
        Reservation {
            id: Ulid::new(),
            restaurant_id: "R1".into(),
            sector_id: "S1".into(),
            table_ids: vec![table.into()],
            party_size: 2,
            span: Span::reservation(s),
            status: ReservationStatus::Confirmed,
            customer: Customer {
                name: "Ana".into(),
                phone: "1".into(),
                email: "ana@example.com".into(),
            },
            notes: None,
            idempotency_key: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn shifts() -> Vec<Shift> {
        vec![Shift::new("12:00", "16:00"), Shift::new("20:00", "23:45")]
    }

    fn slot_at<'a>(slots: &'a [SlotInfo], local: &str) -> &'a SlotInfo {
        let ms = parse_instant(local, BA).unwrap().timestamp_millis();
        slots.iter().find(|s| s.start == ms).unwrap()
    }

    #[test]
    fn grid_has_96_quarter_hours() {
        let grid = day_grid(parse_date("2025-09-08").unwrap(), BA).unwrap();
        assert_eq!(grid.len(), 96);
        assert_eq!(hhmm(&grid[0]), "00:00");
        assert_eq!(hhmm(&grid[1]), "00:15");
        assert_eq!(hhmm(&grid[95]), "23:45");
    }

    #[test]
    fn potential_slots_respect_shifts() {
        let date = parse_date("2025-09-08").unwrap();
        let slots = potential_slots(date, BA, &shifts()).unwrap();
        let labels: Vec<String> = slots.iter().map(hhmm).collect();
        // Lunch: 12:00..=14:30 (11 starts); dinner: 20:00..=22:15 (10 starts).
        assert_eq!(labels.len(), 21);
        assert_eq!(labels.first().map(String::as_str), Some("12:00"));
        assert!(labels.contains(&"14:30".to_string()));
        assert!(!labels.contains(&"14:45".to_string()));
        assert_eq!(labels.last().map(String::as_str), Some("22:15"));
    }

    #[test]
    fn potential_slots_without_shifts_is_whole_day() {
        let date = parse_date("2025-09-08").unwrap();
        let slots = potential_slots(date, BA, &[]).unwrap();
        assert_eq!(slots.len(), 96);
    }

    #[test]
    fn availability_reports_every_slot() {
        let date = parse_date("2025-09-08").unwrap();
        let tables = vec![table("T1", 2, 2), table("T2", 2, 4)];
        let slots = availability_slots(date, BA, &shifts(), &tables, &[]).unwrap();
        assert_eq!(slots.len(), 96);
        assert_eq!(slot_at(&slots, "2025-09-08T03:00").reason(), Some(SlotReason::Closed));
        let noon = slot_at(&slots, "2025-09-08T12:00");
        assert!(noon.is_available());
        assert_eq!(noon.tables(), ["T1".to_string(), "T2".to_string()]);
    }

    #[test]
    fn no_fitting_table_is_no_capacity_inside_shift() {
        let date = parse_date("2025-09-08").unwrap();
        let slots = availability_slots(date, BA, &shifts(), &[], &[]).unwrap();
        assert_eq!(slot_at(&slots, "2025-09-08T20:00").reason(), Some(SlotReason::NoCapacity));
        assert_eq!(slot_at(&slots, "2025-09-08T18:00").reason(), Some(SlotReason::Closed));
    }

    #[test]
    fn booking_removes_table_from_overlapping_slots_only() {
        let date = parse_date("2025-09-08").unwrap();
        let tables = vec![table("T4", 4, 6)];
        let existing = vec![booked("T4", "2025-09-08T20:00")];
        let slots = availability_slots(date, BA, &shifts(), &tables, &existing).unwrap();

        for local in ["2025-09-08T20:00", "2025-09-08T20:45", "2025-09-08T21:15"] {
            assert_eq!(slot_at(&slots, local).reason(), Some(SlotReason::NoCapacity), "{local}");
        }
        // Back-to-back at 21:30 is fine.
        assert!(slot_at(&slots, "2025-09-08T21:30").is_available());
    }

    #[test]
    fn booking_in_other_offset_still_blocks() {
        let date = parse_date("2025-09-08").unwrap();
        let tables = vec![table("T4", 4, 6)];
        // 23:00Z is 20:00 in Buenos Aires.
        let existing = vec![booked("T4", "2025-09-08T23:00:00Z")];
        let slots = availability_slots(date, BA, &shifts(), &tables, &existing).unwrap();
        assert!(!slot_at(&slots, "2025-09-08T20:00").is_available());
    }
}
