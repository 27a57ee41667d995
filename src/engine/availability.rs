use chrono::NaiveDate;
use serde::Serialize;

use crate::limits::*;
use crate::model::*;
use crate::recurrence;

use super::conflict::BLOCKING_STATUSES;
use super::queries::{SLOT_TYPES, TimeframeQuery, higher_priority};
use super::{Engine, EngineError};

/// What a location/item pair looks like on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySlot {
    pub date: NaiveDate,
    /// Timeframe that wins the day by type priority.
    pub timeframe: Option<TimeframeId>,
    pub kind: Option<TimeframeType>,
    /// Bookable hours left after holidays, repairs and bookings.
    pub free: Vec<Span>,
}

impl DaySlot {
    pub fn is_bookable(&self) -> bool {
        !self.free.is_empty()
    }
}

impl Engine {
    /// Day-by-day listing for `[from, to]`, both inclusive.
    pub fn availability(
        &self,
        location: LocationId,
        item: ItemId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DaySlot>, EngineError> {
        if from > to {
            return Ok(Vec::new());
        }
        if (to - from).num_days() > MAX_QUERY_DAYS {
            return Err(EngineError::Validation("availability window too wide".into()));
        }
        let timeframes = self.get(
            &TimeframeQuery::for_pair(location, item)
                .with_types(&SLOT_TYPES)
                .between(from, to),
        )?;

        let mut days = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let active: Vec<&Timeframe> = timeframes
                .iter()
                .filter(|tf| recurrence::is_active_on(tf, date))
                .collect();
            let winner = active.iter().copied().reduce(higher_priority);
            days.push(DaySlot {
                date,
                timeframe: winner.map(|tf| tf.id),
                kind: winner.map(|tf| tf.kind),
                free: free_windows(&active, date),
            });
        }
        Ok(days)
    }
}

/// Bookable windows of the day minus everything that blocks or occupies them.
fn free_windows(active: &[&Timeframe], date: NaiveDate) -> Vec<Span> {
    let mut open: Vec<Span> = active
        .iter()
        .filter(|tf| tf.is_bookable())
        .filter_map(|tf| recurrence::day_window(tf, date))
        .collect();
    open.sort_by_key(|s| s.start);
    let open = merge_overlapping(&open);

    let mut taken: Vec<Span> = active
        .iter()
        .filter(|tf| {
            tf.kind.is_blocking()
                || (tf.kind == TimeframeType::Booking && BLOCKING_STATUSES.contains(&tf.status))
        })
        .filter_map(|tf| recurrence::day_window(tf, date))
        .collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);

    subtract_intervals(&open, &taken)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted, disjoint `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDateTime, NaiveTime};

    use super::*;

    fn h(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn s(a: u32, b: u32) -> Span {
        Span::new(h(a), h(b))
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![s(1, 2), s(3, 4)];
        let result = subtract_intervals(&base, &[s(2, 3)]);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        assert!(subtract_intervals(&[s(2, 4)], &[s(1, 5)]).is_empty());
    }

    #[test]
    fn subtract_partial_left_and_right() {
        assert_eq!(subtract_intervals(&[s(2, 6)], &[s(1, 3)]), vec![s(3, 6)]);
        assert_eq!(subtract_intervals(&[s(2, 6)], &[s(5, 8)]), vec![s(2, 5)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let result = subtract_intervals(&[s(0, 20)], &[s(2, 4), s(8, 10), s(16, 18)]);
        assert_eq!(result, vec![s(0, 2), s(4, 8), s(10, 16), s(18, 20)]);
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let merged = merge_overlapping(&[s(1, 3), s(2, 4), s(5, 6)]);
        assert_eq!(merged, vec![s(1, 4), s(5, 6)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        assert_eq!(merge_overlapping(&[s(1, 2), s(2, 3)]), vec![s(1, 3)]);
    }

    // ── free_windows ─────────────────────────────────────

    #[test]
    fn booking_punches_bookable_hours() {
        let date = h(0).date();
        let bookable = Timeframe {
            id: 1,
            kind: TimeframeType::Bookable,
            repetition: Repetition::Daily,
            start: Some(h(0)),
            start_time: NaiveTime::from_hms_opt(8, 0, 0),
            end_time: NaiveTime::from_hms_opt(16, 0, 0),
            ..Timeframe::default()
        };
        let booking = Booking::new(2, 1, 1, s(10, 12), 7, PostStatus::Confirmed);
        let free = free_windows(&[&bookable, &booking.timeframe], date);
        assert_eq!(free, vec![s(8, 10), s(12, 16)]);
    }

    #[test]
    fn canceled_booking_frees_its_hours() {
        let date = h(0).date();
        let bookable = Timeframe {
            id: 1,
            kind: TimeframeType::Bookable,
            repetition: Repetition::Daily,
            start: Some(h(0)),
            start_time: NaiveTime::from_hms_opt(8, 0, 0),
            end_time: NaiveTime::from_hms_opt(16, 0, 0),
            ..Timeframe::default()
        };
        let booking = Booking::new(2, 1, 1, s(10, 12), 7, PostStatus::Canceled);
        assert_eq!(free_windows(&[&bookable, &booking.timeframe], date), vec![s(8, 16)]);
    }
}
