use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::limits::*;
use crate::model::*;
use crate::recurrence;

use super::{Engine, EngineError};

/// Statuses a query uses when the caller asks for none.
pub const DEFAULT_STATUSES: [PostStatus; 4] = [
    PostStatus::Confirmed,
    PostStatus::Unconfirmed,
    PostStatus::Publish,
    PostStatus::Inherit,
];

/// Everything except BookingCanceled; what can claim a slot.
pub(crate) const SLOT_TYPES: [TimeframeType; 6] = [
    TimeframeType::OpeningHours,
    TimeframeType::Bookable,
    TimeframeType::Holiday,
    TimeframeType::OffHoliday,
    TimeframeType::Repair,
    TimeframeType::Booking,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateSelector {
    #[default]
    Any,
    Day(NaiveDate),
    /// Inclusive on both ends.
    Range(NaiveDate, NaiveDate),
}

/// Filters for [`Engine::get`]. Empty vectors mean "no filter on this dimension".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeframeQuery {
    pub location_ids: Vec<LocationId>,
    pub item_ids: Vec<ItemId>,
    pub types: Vec<TimeframeType>,
    pub date: DateSelector,
    pub only_bookable: bool,
    pub min_end_date: Option<NaiveDateTime>,
    pub statuses: Vec<PostStatus>,
}

impl TimeframeQuery {
    pub fn for_pair(location: LocationId, item: ItemId) -> Self {
        Self {
            location_ids: vec![location],
            item_ids: vec![item],
            ..Self::default()
        }
    }

    pub fn with_types(mut self, types: &[TimeframeType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn with_statuses(mut self, statuses: &[PostStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = DateSelector::Day(date);
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date = DateSelector::Range(start, end);
        self
    }

    fn store_filter(&self) -> StoreFilter {
        let statuses = if self.statuses.is_empty() {
            DEFAULT_STATUSES.to_vec()
        } else {
            self.statuses.clone()
        };
        StoreFilter {
            location_ids: self.location_ids.clone(),
            item_ids: self.item_ids.clone(),
            types: self.types.clone(),
            statuses,
            author: None,
        }
    }

    fn matches(&self, tf: &Timeframe) -> bool {
        if self.only_bookable && !tf.is_bookable() {
            return false;
        }
        if let Some(min) = self.min_end_date
            && !tf.end.is_at_least(min)
        {
            return false;
        }
        match self.date {
            DateSelector::Any => true,
            DateSelector::Day(date) => recurrence::is_active_on(tf, date),
            DateSelector::Range(start, end) => recurrence::occurs_in_range(tf, start, end),
        }
    }
}

/// The timeframe that wins a slot: higher type priority, then lower id.
pub fn higher_priority<'a>(a: &'a Timeframe, b: &'a Timeframe) -> &'a Timeframe {
    match a.kind.priority().cmp(&b.kind.priority()) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal => {
            if a.id <= b.id {
                a
            } else {
                b
            }
        }
    }
}

impl Engine {
    /// Timeframes matching `query`, deduplicated by id and ordered by (start, id).
    pub fn get(&self, query: &TimeframeQuery) -> Result<Vec<Timeframe>, EngineError> {
        let mut found: BTreeMap<TimeframeId, Timeframe> = BTreeMap::new();
        for tf in self.store.timeframes(&query.store_filter())? {
            if query.matches(&tf) {
                found.entry(tf.id).or_insert(tf);
            }
        }
        let mut out: Vec<Timeframe> = found.into_values().collect();
        out.sort_by_key(|tf| (tf.start, tf.id));
        Ok(out)
    }

    pub fn get_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        types: &[TimeframeType],
    ) -> Result<Vec<Timeframe>, EngineError> {
        self.get(&TimeframeQuery::default().with_types(types).between(start, end))
    }

    /// One page of the range scan, pages numbered from 1.
    pub fn get_in_range_paginated(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        page: usize,
        page_size: usize,
        types: &[TimeframeType],
    ) -> Result<Page<Timeframe>, EngineError> {
        let query = TimeframeQuery::default().with_types(types).between(start, end);
        self.paginate(&query, page, page_size)
    }

    /// Pages are cut from the id-ordered result; nothing pins the result between calls.
    pub(crate) fn paginate(
        &self,
        query: &TimeframeQuery,
        page: usize,
        page_size: usize,
    ) -> Result<Page<Timeframe>, EngineError> {
        if page == 0 {
            return Err(EngineError::Validation("page numbers start at 1".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(EngineError::Validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let mut all = self.get(query)?;
        all.sort_by_key(|tf| tf.id);
        let total_pages = all.len().div_ceil(page_size);
        let posts = all
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Ok(Page {
            posts,
            total_pages,
            done: page >= total_pages,
        })
    }

    /// Highest-priority timeframe claiming `date` for the pair.
    pub fn resolve_slot(
        &self,
        location: LocationId,
        item: ItemId,
        date: NaiveDate,
    ) -> Result<Option<Timeframe>, EngineError> {
        let candidates = self.get(
            &TimeframeQuery::for_pair(location, item)
                .with_types(&SLOT_TYPES)
                .on(date),
        )?;
        Ok(pick_highest(&candidates))
    }

    /// Highest-priority timeframe whose window on that day contains `at`.
    pub fn get_by_location_item_timestamp(
        &self,
        location: LocationId,
        item: ItemId,
        at: NaiveDateTime,
    ) -> Result<Option<Timeframe>, EngineError> {
        let candidates: Vec<Timeframe> = self
            .get(
                &TimeframeQuery::for_pair(location, item)
                    .with_types(&SLOT_TYPES)
                    .on(at.date()),
            )?
            .into_iter()
            .filter(|tf| recurrence::covers_instant(tf, at))
            .collect();
        Ok(pick_highest(&candidates))
    }

    /// Published bookable timeframe for the pair on the day of `at`.
    ///
    /// Prefers one whose hours contain `at`, falling back to any active that day.
    pub fn get_bookable_timeframe(
        &self,
        location: LocationId,
        item: ItemId,
        at: NaiveDateTime,
    ) -> Result<Option<Timeframe>, EngineError> {
        let query = TimeframeQuery {
            only_bookable: true,
            ..TimeframeQuery::for_pair(location, item)
                .with_types(&[TimeframeType::Bookable])
                .on(at.date())
        };
        let found = self.get(&query)?;
        let covering = found
            .iter()
            .find(|tf| recurrence::covers_instant(tf, at))
            .or_else(|| found.first());
        Ok(covering.cloned())
    }
}

fn pick_highest(candidates: &[Timeframe]) -> Option<Timeframe> {
    candidates
        .iter()
        .reduce(|best, tf| higher_priority(best, tf))
        .cloned()
}

/// Accepts `YYYY-MM-DD`, an ISO datetime, or unix seconds.
pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return in_range(date);
    }
    parse_instant(s).map(|t| t.date())
}

/// Accepts an ISO datetime (with or without seconds), `YYYY-MM-DD`, or unix seconds.
///
/// Dates past the end of year `FAR_FUTURE_YEAR` are rejected.
pub fn parse_instant(s: &str) -> Result<NaiveDateTime, EngineError> {
    let t = parse_unbounded_instant(s.trim())?;
    in_range(t.date())?;
    Ok(t)
}

fn in_range(date: NaiveDate) -> Result<NaiveDate, EngineError> {
    if date > far_future().date() {
        return Err(EngineError::Validation(format!(
            "date {date} is after the year {FAR_FUTURE_YEAR}"
        )));
    }
    Ok(date)
}

fn parse_unbounded_instant(s: &str) -> Result<NaiveDateTime, EngineError> {
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(t);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(start_of_day(date));
    }
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .map(|t| t.naive_utc())
            .ok_or_else(|| EngineError::Parse(format!("timestamp out of range: {s}")));
    }
    Err(EngineError::Parse(format!("invalid date: {s:?}")))
}
