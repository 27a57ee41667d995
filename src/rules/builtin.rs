use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_QUERY_DAYS;
use crate::model::*;

use super::RuleCheck;

/// A user may not hold two overlapping bookings, on any item.
pub struct SimultaneousBooking;

/// Back-to-back bookings on one item may not add up to more than its max days.
pub struct ChainBooking;

/// `[allowed days, period days]`: days booked within the period centred on the booking.
pub struct MaxBookingDays;

/// `[allowed days, reset weekday]` with 0 = Monday.
pub struct MaxBookingsPerWeek;

/// `[allowed days, reset day of month]`, clamped to the month's length.
pub struct MaxBookingsPerMonth;

impl RuleCheck for SimultaneousBooking {
    fn check(
        &self,
        engine: &Engine,
        booking: &Booking,
        _params: &[i64],
        scope: Option<&BTreeSet<TermId>>,
    ) -> Result<Option<Vec<Booking>>, EngineError> {
        let overlapping =
            engine.overlapping_bookings_of(booking.author, &booking.span(), booking.id())?;
        Ok(Some(restrict_to_scope(engine, overlapping, scope)?))
    }
}

impl RuleCheck for ChainBooking {
    fn check(
        &self,
        engine: &Engine,
        booking: &Booking,
        _params: &[i64],
        // The chain never leaves the booking's own pair, which already passed the scope check.
        _scope: Option<&BTreeSet<TermId>>,
    ) -> Result<Option<Vec<Booking>>, EngineError> {
        let max_days = engine
            .get_bookable_timeframe(booking.location_id(), booking.item_id(), booking.start())?
            .and_then(|tf| tf.max_days);
        let Some(max_days) = max_days else {
            return Ok(None);
        };
        let chain = engine.booking_chain(booking)?;
        if chain.is_empty() {
            return Ok(None);
        }
        let start = chain
            .iter()
            .map(Booking::start)
            .fold(booking.start(), |a, b| a.min(b));
        let end = chain.iter().map(Booking::end).fold(booking.end(), |a, b| a.max(b));
        let combined = Span::new(start, end).days_rounded_up();
        Ok((combined > i64::from(max_days)).then_some(chain))
    }
}

impl RuleCheck for MaxBookingDays {
    fn check(
        &self,
        engine: &Engine,
        booking: &Booking,
        params: &[i64],
        scope: Option<&BTreeSet<TermId>>,
    ) -> Result<Option<Vec<Booking>>, EngineError> {
        self.validate_params(params)?;
        let (allowed, period) = (params[0], params[1]);
        let span = booking.span();
        let window = Duration::try_days(period / 2).and_then(|half| {
            Some(Span::new(
                span.start.checked_sub_signed(half)?,
                span.end.checked_add_signed(half)?,
            ))
        });
        let Some(window) = window else {
            return Err(param_error("maxBookingDays", params));
        };
        limit_exceeded(engine, booking, &window, allowed, scope)
    }

    fn validate_params(&self, params: &[i64]) -> Result<(), EngineError> {
        match params {
            &[allowed, period] if allowed >= 0 && (0..=MAX_QUERY_DAYS).contains(&period) => {
                Ok(())
            }
            _ => Err(param_error("maxBookingDays", params)),
        }
    }
}

impl RuleCheck for MaxBookingsPerWeek {
    fn check(
        &self,
        engine: &Engine,
        booking: &Booking,
        params: &[i64],
        scope: Option<&BTreeSet<TermId>>,
    ) -> Result<Option<Vec<Booking>>, EngineError> {
        self.validate_params(params)?;
        let window = week_window(booking.start().date(), params[1] as u32);
        limit_exceeded(engine, booking, &window, params[0], scope)
    }

    fn validate_params(&self, params: &[i64]) -> Result<(), EngineError> {
        match params {
            &[allowed, reset] if allowed >= 0 && (0..=6).contains(&reset) => Ok(()),
            _ => Err(param_error("maxBookingPerWeek", params)),
        }
    }
}

impl RuleCheck for MaxBookingsPerMonth {
    fn check(
        &self,
        engine: &Engine,
        booking: &Booking,
        params: &[i64],
        scope: Option<&BTreeSet<TermId>>,
    ) -> Result<Option<Vec<Booking>>, EngineError> {
        self.validate_params(params)?;
        let window = month_window(booking.start().date(), params[1] as u32).ok_or_else(|| {
            EngineError::Validation(format!("no month window around {}", booking.start()))
        })?;
        limit_exceeded(engine, booking, &window, params[0], scope)
    }

    fn validate_params(&self, params: &[i64]) -> Result<(), EngineError> {
        match params {
            &[allowed, reset] if allowed >= 0 && (1..=31).contains(&reset) => Ok(()),
            _ => Err(param_error("maxBookingPerMonth", params)),
        }
    }
}

fn param_error(rule: &str, params: &[i64]) -> EngineError {
    EngineError::Configuration(format!("invalid parameters for {rule}: {params:?}"))
}

/// The 7-day window containing `date` that starts on `reset_weekday` (0 = Monday).
pub fn week_window(date: NaiveDate, reset_weekday: u32) -> Span {
    let back = (date.weekday().num_days_from_monday() + 7 - reset_weekday % 7) % 7;
    let start = date - Duration::days(i64::from(back));
    Span::days(start, start + Duration::days(6))
}

/// The month-long window containing `date` that starts on `reset_day`.
///
/// The reset day is clamped to each month's last day, so 31 means "last day"
/// in shorter months.
pub fn month_window(date: NaiveDate, reset_day: u32) -> Option<Span> {
    let this_reset = clamped_day(date.year(), date.month(), reset_day)?;
    let start = if date >= this_reset {
        this_reset
    } else {
        let (y, m) = shift_month(date.year(), date.month(), -1);
        clamped_day(y, m, reset_day)?
    };
    let (y, m) = shift_month(start.year(), start.month(), 1);
    let end = clamped_day(y, m, reset_day)?;
    Some(Span::new(start_of_day(start), start_of_day(end)))
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let idx = year * 12 + month as i32 - 1 + delta;
    (idx.div_euclid(12), idx.rem_euclid(12) as u32 + 1)
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (ny, nm) = shift_month(year, month, 1);
    NaiveDate::from_ymd_opt(ny, nm, 1)?.pred_opt().map(|d| d.day())
}

fn clamped_day(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = days_in_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.clamp(1, last))
}

/// The author's other bookings counting toward a limit in `window`, with their day counts.
fn counted_bookings(
    engine: &Engine,
    booking: &Booking,
    window: &Span,
) -> Result<Vec<(Booking, i64)>, EngineError> {
    let count_canceled = engine.settings().count_canceled;
    let mut statuses = vec![PostStatus::Confirmed];
    if count_canceled {
        statuses.push(PostStatus::Canceled);
    }
    let filter = StoreFilter {
        statuses,
        author: Some(booking.author),
        ..StoreFilter::default()
    };
    let mut counted: Vec<(Booking, i64)> = engine
        .store()
        .bookings(&filter)?
        .into_iter()
        .filter(|b| b.id() != booking.id())
        .filter_map(|b| {
            let days = b
                .counted_span(count_canceled)
                .and_then(|s| s.clamp(window))
                .map_or(0, |s| s.days_rounded_up());
            (days > 0).then_some((b, days))
        })
        .collect();
    counted.sort_by_key(|(b, _)| (b.start(), b.id()));
    Ok(counted)
}

/// Conflicts when the counted days plus the candidate's own exceed `allowed`.
fn limit_exceeded(
    engine: &Engine,
    booking: &Booking,
    window: &Span,
    allowed: i64,
    scope: Option<&BTreeSet<TermId>>,
) -> Result<Option<Vec<Booking>>, EngineError> {
    let mut counted = counted_bookings(engine, booking, window)?;
    if let Some(terms) = scope {
        let mut kept = Vec::with_capacity(counted.len());
        for (b, days) in counted {
            if engine.terms_apply(&b, terms)? {
                kept.push((b, days));
            }
        }
        counted = kept;
    }
    if counted.is_empty() {
        return Ok(None);
    }
    let total: i64 = counted.iter().map(|(_, d)| d).sum::<i64>() + booking.span().days_rounded_up();
    if total <= allowed {
        return Ok(None);
    }
    Ok(Some(counted.into_iter().map(|(b, _)| b).collect()))
}

fn restrict_to_scope(
    engine: &Engine,
    bookings: Vec<Booking>,
    scope: Option<&BTreeSet<TermId>>,
) -> Result<Vec<Booking>, EngineError> {
    let Some(terms) = scope else {
        return Ok(bookings);
    };
    let mut kept = Vec::with_capacity(bookings.len());
    for b in bookings {
        if engine.terms_apply(&b, terms)? {
            kept.push(b);
        }
    }
    Ok(kept)
}
