//! Pickup and return windows of bookings on hourly or slot grids.

use chrono::{Duration, NaiveDateTime, Timelike};

use crate::model::{Booking, Span, Timeframe, end_of_day, start_of_day};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

/// Slot length in hours: the grid when set, else the distance between start and end time.
pub fn grid_size(tf: &Timeframe) -> u32 {
    if tf.grid > 0 {
        return tf.grid;
    }
    if tf.full_day {
        return 24;
    }
    match (tf.start_time, tf.end_time) {
        (Some(st), Some(et)) if et > st => {
            let hours = (et - st).num_minutes().div_euclid(60);
            u32::try_from(hours).unwrap_or(0)
        }
        _ => 24,
    }
}

pub fn pickup_instant(booking: &Booking) -> NaiveDateTime {
    let start = booking.start();
    if booking.timeframe.full_day {
        start_of_day(start.date())
    } else {
        start
    }
}

pub fn return_instant(booking: &Booking) -> NaiveDateTime {
    let end = booking.end();
    if booking.timeframe.full_day {
        end_of_day(end.date())
    } else {
        end
    }
}

fn slot_hours(grid: u32, captured: Option<u32>) -> Option<u32> {
    if grid > 0 { Some(grid) } else { captured }
}

/// Window in which the item can be picked up. Full-day bookings have none.
pub fn pickup_window(booking: &Booking) -> Option<Span> {
    let tf = &booking.timeframe;
    if tf.full_day {
        return None;
    }
    let start = booking.start();
    let end = match slot_hours(tf.grid, booking.grid_size_start) {
        Some(hours) => start + Duration::hours(i64::from(hours)),
        None => tf
            .end_time
            .map(|et| start.date().and_time(et))
            .filter(|e| *e >= start)
            .unwrap_or(start),
    };
    Some(Span::new(start, end))
}

/// Window in which the item has to be returned. Full-day bookings have none.
pub fn return_window(booking: &Booking) -> Option<Span> {
    let tf = &booking.timeframe;
    if tf.full_day {
        return None;
    }
    let end = booking.end();
    let start = match slot_hours(tf.grid, booking.grid_size_end) {
        Some(hours) => end - Duration::hours(i64::from(hours)) + Duration::seconds(1),
        None => tf
            .start_time
            .map(|st| end.date().and_time(st))
            .filter(|s| *s <= end)
            .unwrap_or(end),
    };
    Some(Span::new(start.min(end), end))
}

/// Stored ends sit on hh:59:59; show them as the next full minute.
fn display_time(t: NaiveDateTime) -> String {
    let shown = if t.second() == 59 { t + Duration::seconds(1) } else { t };
    shown.format(TIME_FORMAT).to_string()
}

pub fn format_pickup(booking: &Booking) -> String {
    let date = pickup_instant(booking).format(DATE_FORMAT);
    match pickup_window(booking) {
        None => date.to_string(),
        Some(w) => format!("{date} {} - {}", display_time(w.start), display_time(w.end)),
    }
}

pub fn format_return(booking: &Booking) -> String {
    let date = return_instant(booking).format(DATE_FORMAT);
    match return_window(booking) {
        None => date.to_string(),
        Some(w) => format!("{date} {} - {}", display_time(w.start), display_time(w.end)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::model::PostStatus;

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn booking(start: NaiveDateTime, end: NaiveDateTime) -> Booking {
        Booking::new(1, 1, 1, Span::new(start, end), 9, PostStatus::Confirmed)
    }

    #[test]
    fn grid_size_from_times() {
        let tf = Timeframe {
            start_time: NaiveTime::from_hms_opt(8, 0, 0),
            end_time: NaiveTime::from_hms_opt(12, 0, 0),
            ..Timeframe::default()
        };
        assert_eq!(grid_size(&tf), 4);
        let hourly = Timeframe { grid: 2, ..tf };
        assert_eq!(grid_size(&hourly), 2);
    }

    #[test]
    fn full_day_has_no_windows() {
        let mut b = booking(at(1, 0, 0, 0), at(3, 23, 59, 59));
        b.timeframe.full_day = true;
        assert_eq!(pickup_instant(&b), at(1, 0, 0, 0));
        assert_eq!(return_instant(&b), at(3, 23, 59, 59));
        assert!(pickup_window(&b).is_none());
        assert_eq!(format_pickup(&b), "2024-05-01");
        assert_eq!(format_return(&b), "2024-05-03");
    }

    #[test]
    fn hourly_grid_windows() {
        let mut b = booking(at(1, 10, 0, 0), at(2, 11, 59, 59));
        b.timeframe.grid = 1;
        assert_eq!(pickup_window(&b), Some(Span::new(at(1, 10, 0, 0), at(1, 11, 0, 0))));
        assert_eq!(
            return_window(&b),
            Some(Span::new(at(2, 11, 0, 0), at(2, 11, 59, 59)))
        );
        assert_eq!(format_pickup(&b), "2024-05-01 10:00 - 11:00");
        assert_eq!(format_return(&b), "2024-05-02 11:00 - 12:00");
    }

    #[test]
    fn slot_grid_uses_captured_sizes() {
        let mut b = booking(at(1, 8, 0, 0), at(1, 11, 59, 59));
        b.grid_size_start = Some(4);
        b.grid_size_end = Some(4);
        assert_eq!(pickup_window(&b), Some(Span::new(at(1, 8, 0, 0), at(1, 12, 0, 0))));
        assert_eq!(
            return_window(&b),
            Some(Span::new(at(1, 8, 0, 0), at(1, 11, 59, 59)))
        );
    }

    #[test]
    fn slot_grid_falls_back_to_configured_times() {
        let mut b = booking(at(1, 8, 0, 0), at(2, 11, 59, 59));
        b.timeframe.start_time = NaiveTime::from_hms_opt(8, 0, 0);
        b.timeframe.end_time = NaiveTime::from_hms_opt(12, 0, 0);
        assert_eq!(pickup_window(&b), Some(Span::new(at(1, 8, 0, 0), at(1, 12, 0, 0))));
        assert_eq!(
            return_window(&b),
            Some(Span::new(at(2, 8, 0, 0), at(2, 11, 59, 59)))
        );
    }
}
