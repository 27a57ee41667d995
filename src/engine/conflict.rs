use chrono::{Duration, NaiveDate};

use crate::limits::*;
use crate::model::*;
use crate::recurrence;

use super::queries::TimeframeQuery;
use super::{Engine, EngineError};

/// Booking statuses that occupy their slot.
pub const BLOCKING_STATUSES: [PostStatus; 2] = [PostStatus::Unconfirmed, PostStatus::Confirmed];

const BLOCKING_TYPES: [TimeframeType; 3] = [
    TimeframeType::Holiday,
    TimeframeType::OffHoliday,
    TimeframeType::Repair,
];

pub(crate) const OVERLAP_MESSAGE: &str = "There is already a booking in this time-range.";

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start > span.end {
        return Err(EngineError::Validation("booking starts after it ends".into()));
    }
    if span.end > far_future() {
        return Err(EngineError::Validation("booking ends too far in the future".into()));
    }
    if span.days_rounded_up() > MAX_QUERY_DAYS {
        return Err(EngineError::Validation("booking spans too many days".into()));
    }
    Ok(())
}

/// Windows closing at the last second of a day run on to the next midnight.
fn through_midnight(window: Span) -> Span {
    if window.end == end_of_day(window.end.date())
        && let Some(end) = window.end.checked_add_signed(Duration::seconds(1))
    {
        Span::new(window.start, end)
    } else {
        window
    }
}

impl Engine {
    /// Bookings of exactly this location+item pair overlapping `[start, end)`.
    ///
    /// `only_statuses` (or the blocking default when empty) selects candidates,
    /// then `exclude_statuses` is removed from that set.
    pub fn get_by_timerange(
        &self,
        span: Span,
        location: LocationId,
        item: ItemId,
        exclude_statuses: &[PostStatus],
        only_statuses: &[PostStatus],
    ) -> Result<Vec<Booking>, EngineError> {
        let mut statuses = if only_statuses.is_empty() {
            BLOCKING_STATUSES.to_vec()
        } else {
            only_statuses.to_vec()
        };
        statuses.retain(|s| !exclude_statuses.contains(s));
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let filter = StoreFilter {
            location_ids: vec![location],
            item_ids: vec![item],
            statuses,
            ..StoreFilter::default()
        };
        let mut found: Vec<Booking> = self
            .store
            .bookings(&filter)?
            .into_iter()
            .filter(|b| b.span().overlaps(&span))
            .collect();
        found.sort_by_key(|b| (b.start(), b.id()));
        Ok(found)
    }

    /// Fails with `Overlap` unless the only overlapping booking is the one being edited.
    pub fn validate_booking_parameters(
        &self,
        booking_id: Option<TimeframeId>,
        location: LocationId,
        item: ItemId,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let conflicts: Vec<TimeframeId> = self
            .get_by_timerange(span, location, item, &[], &[])?
            .iter()
            .map(Booking::id)
            .filter(|id| Some(*id) != booking_id)
            .collect();
        if conflicts.is_empty() {
            return Ok(());
        }
        metrics::counter!(crate::observability::OVERLAP_REJECTIONS_TOTAL).increment(1);
        Err(EngineError::Overlap {
            message: OVERLAP_MESSAGE.to_string(),
            conflicts,
        })
    }

    /// Blocking bookings of `author` on any item/location that overlap `span`.
    pub(crate) fn overlapping_bookings_of(
        &self,
        author: UserId,
        span: &Span,
        exclude: TimeframeId,
    ) -> Result<Vec<Booking>, EngineError> {
        let filter = StoreFilter {
            statuses: BLOCKING_STATUSES.to_vec(),
            author: Some(author),
            ..StoreFilter::default()
        };
        let mut found: Vec<Booking> = self
            .store
            .bookings(&filter)?
            .into_iter()
            .filter(|b| b.id() != exclude && b.span().overlaps(span))
            .collect();
        found.sort_by_key(|b| (b.start(), b.id()));
        Ok(found)
    }

    /// Bookings linked to `booking` through back-to-back neighbours on the same pair.
    ///
    /// Two bookings are linked when the gap between them is at most
    /// `CHAIN_ADJACENCY_SECS`. The candidate itself is not part of the result.
    pub(crate) fn booking_chain(&self, booking: &Booking) -> Result<Vec<Booking>, EngineError> {
        let filter = StoreFilter {
            location_ids: vec![booking.location_id()],
            item_ids: vec![booking.item_id()],
            statuses: BLOCKING_STATUSES.to_vec(),
            ..StoreFilter::default()
        };
        let mut pool: Vec<Booking> = self
            .store
            .bookings(&filter)?
            .into_iter()
            .filter(|b| b.id() != booking.id())
            .collect();
        pool.sort_by_key(|b| (b.start(), b.id()));

        let tolerance = Duration::seconds(CHAIN_ADJACENCY_SECS);
        let mut chain: Vec<Booking> = Vec::new();

        let mut edge = booking.start();
        while chain.len() < MAX_CHAIN_LENGTH {
            let found = pool
                .iter()
                .position(|b| b.end() <= edge && edge - b.end() <= tolerance);
            let Some(idx) = found else { break };
            let prev = pool.remove(idx);
            edge = prev.start();
            chain.push(prev);
        }

        let mut edge = booking.end();
        while chain.len() < MAX_CHAIN_LENGTH {
            let found = pool
                .iter()
                .position(|b| b.start() >= edge && b.start() - edge <= tolerance);
            let Some(idx) = found else { break };
            let next = pool.remove(idx);
            edge = next.end();
            chain.push(next);
        }

        chain.sort_by_key(|b| (b.start(), b.id()));
        Ok(chain)
    }

    /// First holiday/repair timeframe whose window on some day intersects `span`.
    pub(crate) fn blocking_timeframe(
        &self,
        location: LocationId,
        item: ItemId,
        span: &Span,
    ) -> Result<Option<(NaiveDate, Timeframe)>, EngineError> {
        let (first, last) = (span.start.date(), span.end.date());
        let blockers = self.get(
            &TimeframeQuery::for_pair(location, item)
                .with_types(&BLOCKING_TYPES)
                .between(first, last),
        )?;
        let mut earliest: Option<(NaiveDate, Timeframe)> = None;
        for tf in blockers {
            let hit = recurrence::occurrences(&tf, first, last).find(|d| {
                recurrence::day_window(&tf, *d)
                    .is_some_and(|w| through_midnight(w).overlaps(span))
            });
            if let Some(day) = hit
                && earliest.as_ref().is_none_or(|(d, _)| day < *d)
            {
                earliest = Some((day, tf));
            }
        }
        Ok(earliest)
    }
}
