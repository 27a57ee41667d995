//! Expansion of timeframe repetition rules into concrete calendar days.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::model::{Repetition, Span, Timeframe, end_of_day, start_of_day};

/// Whether `tf` covers `date` according to its repetition and bounds.
///
/// Manual timeframes ignore start/end entirely and only look at their date list.
pub fn is_active_on(tf: &Timeframe, date: NaiveDate) -> bool {
    match tf.repetition {
        Repetition::Manual => tf.manual_dates.contains(&date),
        _ => within_bounds(tf, date) && matches_pattern(tf, date),
    }
}

fn within_bounds(tf: &Timeframe, date: NaiveDate) -> bool {
    tf.start_date().is_none_or(|s| date >= s) && date <= tf.end_date()
}

fn matches_pattern(tf: &Timeframe, date: NaiveDate) -> bool {
    match tf.repetition {
        Repetition::None | Repetition::Daily => true,
        Repetition::Weekly => {
            let iso = date.weekday().number_from_monday() as u8;
            tf.weekdays.contains(&iso)
        }
        Repetition::Monthly => tf.start.is_some_and(|s| s.day() == date.day()),
        Repetition::Yearly => tf
            .start
            .is_some_and(|s| s.month() == date.month() && s.day() == date.day()),
        Repetition::Manual => tf.manual_dates.contains(&date),
    }
}

/// Dates within `[range_start, range_end]` (inclusive) on which `tf` is active, ascending.
pub fn occurrences<'a>(
    tf: &'a Timeframe,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> Box<dyn Iterator<Item = NaiveDate> + 'a> {
    if range_start > range_end {
        return Box::new(std::iter::empty());
    }
    match tf.repetition {
        Repetition::Manual => Box::new(tf.manual_dates.range(range_start..=range_end).copied()),
        Repetition::Weekly if tf.weekdays.is_empty() => Box::new(std::iter::empty()),
        _ => {
            let lo = tf.start_date().map_or(range_start, |s| s.max(range_start));
            let hi = tf.end_date().min(range_end);
            if lo > hi {
                return Box::new(std::iter::empty());
            }
            Box::new(
                lo.iter_days()
                    .take_while(move |d| *d <= hi)
                    .filter(move |d| matches_pattern(tf, *d)),
            )
        }
    }
}

pub fn occurs_in_range(tf: &Timeframe, range_start: NaiveDate, range_end: NaiveDate) -> bool {
    occurrences(tf, range_start, range_end).next().is_some()
}

/// Time-of-day window `tf` occupies on `date`, or `None` when inactive that day.
///
/// Full-day timeframes take the whole day. Otherwise the configured start/end
/// time is used; bookings and timeframes without one get the day clipped to
/// their own span, so multi-day bookings and repairs cover partial days.
pub fn day_window(tf: &Timeframe, date: NaiveDate) -> Option<Span> {
    if !is_active_on(tf, date) {
        return None;
    }
    let whole = Span::new(start_of_day(date), end_of_day(date));
    if tf.full_day {
        return Some(whole);
    }
    if let (Some(st), Some(et)) = (tf.start_time, tf.end_time)
        && st <= et
        && !tf.kind.is_booking()
    {
        return Some(Span::new(date.and_time(st), date.and_time(et)));
    }
    if tf.repetition == Repetition::Manual {
        return Some(whole);
    }
    let start = tf.start.map_or(whole.start, |s| s.max(whole.start));
    let end = tf.end.resolve().min(whole.end);
    (start <= end).then(|| Span::new(start, end))
}

/// Whether `tf` covers the instant `at`, boundaries inclusive.
pub fn covers_instant(tf: &Timeframe, at: NaiveDateTime) -> bool {
    day_window(tf, at.date()).is_some_and(|w| w.start <= at && at <= w.end)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveTime;

    use super::*;
    use crate::limits::far_future;
    use crate::model::{DateBound, TimeframeType};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn tf(repetition: Repetition, start: NaiveDate, end: Option<NaiveDate>) -> Timeframe {
        Timeframe {
            id: 1,
            kind: TimeframeType::Bookable,
            repetition,
            start: Some(start_of_day(start)),
            end: end.map_or(DateBound::Unbounded, |e| DateBound::Bounded(end_of_day(e))),
            full_day: true,
            ..Timeframe::default()
        }
    }

    #[test]
    fn daily_respects_bounds() {
        let t = tf(Repetition::Daily, d(2024, 5, 1), Some(d(2024, 5, 10)));
        assert!(!is_active_on(&t, d(2024, 4, 30)));
        assert!(is_active_on(&t, d(2024, 5, 1)));
        assert!(is_active_on(&t, d(2024, 5, 10)));
        assert!(!is_active_on(&t, d(2024, 5, 11)));
    }

    #[test]
    fn unbounded_runs_to_sentinel() {
        let t = tf(Repetition::Daily, d(2024, 5, 1), None);
        assert!(is_active_on(&t, d(2300, 1, 1)));
        assert!(is_active_on(&t, far_future().date()));
    }

    #[test]
    fn weekly_uses_iso_mask() {
        let mut t = tf(Repetition::Weekly, d(2024, 5, 1), None);
        t.weekdays = BTreeSet::from([1, 3]); // Monday, Wednesday
        let days: Vec<_> = occurrences(&t, d(2024, 5, 1), d(2024, 5, 14)).collect();
        assert_eq!(
            days,
            vec![d(2024, 5, 1), d(2024, 5, 6), d(2024, 5, 8), d(2024, 5, 13)]
        );
    }

    #[test]
    fn weekly_mask_on_boundary_dates() {
        // Monday 2024-05-06 through Friday 2024-05-31
        let mut t = tf(Repetition::Weekly, d(2024, 5, 6), Some(d(2024, 5, 31)));
        t.weekdays = BTreeSet::from([1, 3, 5]);
        assert!(is_active_on(&t, d(2024, 5, 6)));
        assert!(is_active_on(&t, d(2024, 5, 8)));
        assert!(is_active_on(&t, d(2024, 5, 31)));
        assert!(!is_active_on(&t, d(2024, 5, 7)));
        assert!(!is_active_on(&t, d(2024, 5, 26)));
        // matching weekdays just outside the bounds
        assert!(!is_active_on(&t, d(2024, 5, 3)));
        assert!(!is_active_on(&t, d(2024, 6, 3)));
        assert_eq!(occurrences(&t, d(2024, 5, 1), d(2024, 6, 30)).count(), 12);
    }

    #[test]
    fn weekly_without_mask_is_empty() {
        let t = tf(Repetition::Weekly, d(2024, 5, 1), None);
        assert!(!occurs_in_range(&t, d(2024, 5, 1), d(2024, 12, 31)));
    }

    #[test]
    fn monthly_on_31st_skips_short_months() {
        let t = tf(Repetition::Monthly, d(2024, 1, 31), None);
        let days: Vec<_> = occurrences(&t, d(2024, 1, 1), d(2024, 6, 30)).collect();
        assert_eq!(days, vec![d(2024, 1, 31), d(2024, 3, 31), d(2024, 5, 31)]);
    }

    #[test]
    fn yearly_feb_29_only_in_leap_years() {
        let t = tf(Repetition::Yearly, d(2024, 2, 29), None);
        let days: Vec<_> = occurrences(&t, d(2024, 1, 1), d(2029, 1, 1)).collect();
        assert_eq!(days, vec![d(2024, 2, 29), d(2028, 2, 29)]);
    }

    #[test]
    fn manual_ignores_bounds() {
        let mut t = tf(Repetition::Manual, d(2024, 5, 1), Some(d(2024, 5, 2)));
        t.manual_dates = BTreeSet::from([d(2023, 1, 1), d(2025, 7, 4)]);
        assert!(is_active_on(&t, d(2023, 1, 1)));
        assert!(is_active_on(&t, d(2025, 7, 4)));
        assert!(!is_active_on(&t, d(2024, 5, 1)));
        let days: Vec<_> = occurrences(&t, d(2024, 1, 1), d(2025, 12, 31)).collect();
        assert_eq!(days, vec![d(2025, 7, 4)]);
    }

    #[test]
    fn manual_without_dates_never_occurs() {
        let t = tf(Repetition::Manual, d(2024, 5, 1), None);
        assert!(!occurs_in_range(&t, d(2000, 1, 1), d(2100, 1, 1)));
    }

    #[test]
    fn inverted_range_is_empty() {
        let t = tf(Repetition::Daily, d(2024, 5, 1), None);
        assert_eq!(occurrences(&t, d(2024, 6, 1), d(2024, 5, 1)).count(), 0);
    }

    #[test]
    fn full_day_window_spans_whole_day() {
        let t = tf(Repetition::Daily, d(2024, 5, 1), None);
        let w = day_window(&t, d(2024, 5, 3)).unwrap();
        assert_eq!(w.start, start_of_day(d(2024, 5, 3)));
        assert_eq!(w.end, end_of_day(d(2024, 5, 3)));
    }

    #[test]
    fn hourly_window_uses_configured_times() {
        let mut t = tf(Repetition::Daily, d(2024, 5, 1), None);
        t.full_day = false;
        t.start_time = NaiveTime::from_hms_opt(8, 0, 0);
        t.end_time = NaiveTime::from_hms_opt(12, 0, 0);
        let w = day_window(&t, d(2024, 5, 2)).unwrap();
        assert_eq!(w.start, d(2024, 5, 2).and_hms_opt(8, 0, 0).unwrap());
        assert_eq!(w.end, d(2024, 5, 2).and_hms_opt(12, 0, 0).unwrap());
        assert!(covers_instant(&t, d(2024, 5, 2).and_hms_opt(12, 0, 0).unwrap()));
        assert!(!covers_instant(&t, d(2024, 5, 2).and_hms_opt(13, 0, 0).unwrap()));
    }

    #[test]
    fn multi_day_span_clips_partial_days() {
        let t = Timeframe {
            id: 2,
            kind: TimeframeType::Repair,
            start: Some(d(2024, 5, 1).and_hms_opt(14, 0, 0).unwrap()),
            end: DateBound::Bounded(d(2024, 5, 3).and_hms_opt(9, 0, 0).unwrap()),
            ..Timeframe::default()
        };
        let first = day_window(&t, d(2024, 5, 1)).unwrap();
        assert_eq!(first.start, d(2024, 5, 1).and_hms_opt(14, 0, 0).unwrap());
        let last = day_window(&t, d(2024, 5, 3)).unwrap();
        assert_eq!(last.end, d(2024, 5, 3).and_hms_opt(9, 0, 0).unwrap());
        assert!(day_window(&t, d(2024, 5, 4)).is_none());
    }
}
