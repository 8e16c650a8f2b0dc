use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::models::{BlockedRange, TimeRange, WeeklyAvailability};

/// A bookable interval derived from the weekly template, qualified with the
/// teacher's UTC offset.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Slot {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub duration_minutes: i64,
    pub available: bool,
}

/// Half-open interval intersection at minute resolution. Any partial
/// overlap counts.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Merge same-day open intervals before slicing, so overlapping or
/// adjacent rules don't produce duplicate slots.
fn merge_ranges(ranges: &[TimeRange]) -> Vec<TimeRange> {
    let mut sorted: Vec<TimeRange> = ranges
        .iter()
        .copied()
        .filter(|r| r.start < r.end)
        .collect();
    sorted.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<TimeRange> = Vec::new();
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

pub(crate) fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    let utc_naive = local - Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::<Utc>::from_naive_utc_and_offset(utc_naive, Utc)
}

/// Generate the ordered sequence of open slots for one teacher.
///
/// The weekly template is walked per date in `[from, to]`; each merged open
/// interval is sliced into consecutive `duration_minutes` chunks aligned to
/// the interval start, with any remainder shorter than a full slot dropped.
/// Chunks that overlap a booked interval or an exception block are
/// discarded. Pure function of its inputs, so re-running it with the same
/// arguments yields the same sequence.
pub fn generate_slots(
    template: &WeeklyAvailability,
    exceptions: &[BlockedRange],
    booked: &[(DateTime<Utc>, DateTime<Utc>)],
    from: NaiveDate,
    to: NaiveDate,
    duration_minutes: i64,
    offset: FixedOffset,
) -> Vec<Slot> {
    let mut slots = Vec::new();
    if duration_minutes <= 0 || from > to {
        return slots;
    }

    let step = Duration::minutes(duration_minutes);
    let mut date = from;
    while date <= to {
        for range in merge_ranges(template.for_weekday(date.weekday())) {
            let mut cursor = date.and_time(range.start);
            let interval_end = date.and_time(range.end);

            while cursor + step <= interval_end {
                let start_utc = local_to_utc(cursor, offset);
                let end_utc = start_utc + step;

                let blocked = booked
                    .iter()
                    .any(|(b_start, b_end)| overlaps(start_utc, end_utc, *b_start, *b_end))
                    || exceptions
                        .iter()
                        .any(|b| overlaps(start_utc, end_utc, b.start, b.end));

                if !blocked {
                    slots.push(Slot {
                        start: start_utc.with_timezone(&offset),
                        end: end_utc.with_timezone(&offset),
                        duration_minutes,
                        available: true,
                    });
                }

                cursor += step;
            }
        }

        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    slots
}

/// Whether `[start, start+duration)` falls entirely inside the teacher's
/// open template, excluding exception blocks. Intervals crossing midnight
/// in the teacher's local calendar are never covered.
pub fn template_covers(
    template: &WeeklyAvailability,
    exceptions: &[BlockedRange],
    start: DateTime<Utc>,
    duration_minutes: i64,
    offset: FixedOffset,
) -> bool {
    let end = start + Duration::minutes(duration_minutes);
    if exceptions.iter().any(|b| overlaps(start, end, b.start, b.end)) {
        return false;
    }

    let local_start = start.with_timezone(&offset).naive_local();
    let local_end = end.with_timezone(&offset).naive_local();
    if local_start.date() != local_end.date() {
        return false;
    }

    merge_ranges(template.for_weekday(local_start.date().weekday()))
        .iter()
        .any(|r| r.start <= local_start.time() && local_end.time() <= r.end)
}
