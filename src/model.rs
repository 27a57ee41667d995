use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::limits::far_future;

pub type TimeframeId = u64;
pub type LocationId = u64;
pub type ItemId = u64;
pub type UserId = u64;
pub type TermId = u64;

/// Id carried by a booking that has not been persisted yet. Stores never hand it out.
pub const UNSAVED_ID: TimeframeId = 0;

const SECS_PER_DAY: i64 = 86_400;

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Last second of the day; full-day records end here rather than at the next midnight.
pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(23, 59, 59).unwrap_or_else(|| start_of_day(date))
}

/// Half-open interval `[start, end)` of wall-clock instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Whole calendar days `[first 00:00, last + 1 00:00)`.
    pub fn days(first: NaiveDate, last: NaiveDate) -> Self {
        Self::new(start_of_day(first), start_of_day(last) + Duration::days(1))
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }

    /// Intersection with `other`, or `None` when they do not overlap.
    pub fn clamp(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| Span::new(start, end))
    }

    /// Length in days, any started day counting as a full one.
    pub fn days_rounded_up(&self) -> i64 {
        let secs = self.duration().num_seconds();
        if secs <= 0 {
            return 0;
        }
        (secs + SECS_PER_DAY - 1) / SECS_PER_DAY
    }
}

/// End of a timeframe. Open-ended timeframes are `Unbounded`, never a null date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateBound {
    Bounded(NaiveDateTime),
    #[default]
    Unbounded,
}

impl DateBound {
    /// Concrete end, using the far-future sentinel for unbounded timeframes.
    pub fn resolve(&self) -> NaiveDateTime {
        match self {
            DateBound::Bounded(end) => *end,
            DateBound::Unbounded => far_future(),
        }
    }

    pub fn bounded(&self) -> Option<NaiveDateTime> {
        match self {
            DateBound::Bounded(end) => Some(*end),
            DateBound::Unbounded => None,
        }
    }

    pub fn is_at_least(&self, min: NaiveDateTime) -> bool {
        match self {
            DateBound::Bounded(end) => *end >= min,
            DateBound::Unbounded => true,
        }
    }
}

/// What a timeframe represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeframeType {
    OpeningHours,
    #[default]
    Bookable,
    Holiday,
    OffHoliday,
    Repair,
    Booking,
    BookingCanceled,
}

impl TimeframeType {
    pub const ALL: [TimeframeType; 7] = [
        TimeframeType::OpeningHours,
        TimeframeType::Bookable,
        TimeframeType::Holiday,
        TimeframeType::OffHoliday,
        TimeframeType::Repair,
        TimeframeType::Booking,
        TimeframeType::BookingCanceled,
    ];

    /// Numeric type id used by the hosting store and by exports.
    pub fn id(self) -> u8 {
        match self {
            TimeframeType::OpeningHours => 1,
            TimeframeType::Bookable => 2,
            TimeframeType::Holiday => 3,
            TimeframeType::OffHoliday => 4,
            TimeframeType::Repair => 5,
            TimeframeType::Booking => 6,
            TimeframeType::BookingCanceled => 7,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }

    /// Higher wins when several timeframes claim the same slot.
    pub fn priority(self) -> u8 {
        match self {
            TimeframeType::Repair => 10,
            TimeframeType::Booking => 9,
            TimeframeType::Holiday => 8,
            TimeframeType::OffHoliday => 7,
            TimeframeType::Bookable => 6,
            TimeframeType::OpeningHours => 5,
            TimeframeType::BookingCanceled => 0,
        }
    }

    /// Types that make a day unavailable for new bookings.
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            TimeframeType::Holiday | TimeframeType::OffHoliday | TimeframeType::Repair
        )
    }

    pub fn is_booking(self) -> bool {
        matches!(self, TimeframeType::Booking | TimeframeType::BookingCanceled)
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeframeType::OpeningHours => "Opening Hours",
            TimeframeType::Bookable => "Bookable",
            TimeframeType::Holiday => "Holidays",
            TimeframeType::OffHoliday => "Official Holiday",
            TimeframeType::Repair => "Repair",
            TimeframeType::Booking => "Booking",
            TimeframeType::BookingCanceled => "Booking cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repetition {
    #[default]
    #[serde(alias = "norep")]
    None,
    #[serde(alias = "d")]
    Daily,
    #[serde(alias = "w")]
    Weekly,
    #[serde(alias = "m")]
    Monthly,
    #[serde(alias = "y")]
    Yearly,
    Manual,
}

/// Post status as kept by the store. Bookings use the unconfirmed/confirmed/canceled subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Publish,
    Draft,
    Inherit,
    Unconfirmed,
    Confirmed,
    Canceled,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Draft => "draft",
            PostStatus::Inherit => "inherit",
            PostStatus::Unconfirmed => "unconfirmed",
            PostStatus::Confirmed => "confirmed",
            PostStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "publish" => Some(PostStatus::Publish),
            "draft" => Some(PostStatus::Draft),
            "inherit" => Some(PostStatus::Inherit),
            "unconfirmed" => Some(PostStatus::Unconfirmed),
            "confirmed" => Some(PostStatus::Confirmed),
            "canceled" | "cancelled" => Some(PostStatus::Canceled),
            _ => None,
        }
    }
}

/// A recurring or fixed-span availability/blocking window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeframe {
    pub id: TimeframeId,
    pub location_ids: BTreeSet<LocationId>,
    pub item_ids: BTreeSet<ItemId>,
    pub kind: TimeframeType,
    pub start: Option<NaiveDateTime>,
    pub end: DateBound,
    pub repetition: Repetition,
    /// ISO weekdays 1 (Monday) ..= 7 (Sunday); weekly repetition only.
    pub weekdays: BTreeSet<u8>,
    /// Manual repetition only.
    pub manual_dates: BTreeSet<NaiveDate>,
    pub full_day: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// 0 = one slot spans start..end time; N = N-hour slots.
    pub grid: u32,
    pub max_days: Option<u32>,
    pub advance_booking_days: Option<u32>,
    pub status: PostStatus,
}

impl Timeframe {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |what: &str| {
            let noun = if self.kind.is_booking() { "booking" } else { "timeframe" };
            Err(EngineError::Validation(format!("{noun} {}: {what}", self.id)))
        };
        match self.repetition {
            Repetition::Manual if self.manual_dates.is_empty() => {
                return invalid("manual repetition without dates");
            }
            Repetition::Weekly if self.weekdays.is_empty() => {
                return invalid("weekly repetition without weekdays");
            }
            _ => {}
        }
        if let Some(bad) = self.weekdays.iter().find(|d| !(1..=7).contains(*d)) {
            return invalid(&format!("weekday {bad} out of range"));
        }
        if let (Some(start), DateBound::Bounded(end)) = (self.start, self.end)
            && start > end
        {
            return invalid("starts after it ends");
        }
        if self.kind.is_booking() {
            if self.location_ids.len() != 1 || self.item_ids.len() != 1 {
                return invalid("needs exactly one location and one item");
            }
            if self.start.is_none() || self.end.bounded().is_none() {
                return invalid("needs concrete start and end");
            }
            if self.repetition != Repetition::None {
                return invalid("bookings do not repeat");
            }
        }
        Ok(())
    }

    /// True if any assigned location is in `locations` (empty = no filter).
    pub fn matches_locations(&self, locations: &[LocationId]) -> bool {
        locations.is_empty() || locations.iter().any(|l| self.location_ids.contains(l))
    }

    pub fn matches_items(&self, items: &[ItemId]) -> bool {
        items.is_empty() || items.iter().any(|i| self.item_ids.contains(i))
    }

    pub fn applies_to(&self, location: LocationId, item: ItemId) -> bool {
        self.location_ids.contains(&location) && self.item_ids.contains(&item)
    }

    pub fn is_bookable(&self) -> bool {
        self.kind == TimeframeType::Bookable && self.status == PostStatus::Publish
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start.map(|s| s.date())
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.resolve().date()
    }

    /// Concrete span, available for non-repeating timeframes with a start.
    pub fn span(&self) -> Option<Span> {
        let start = self.start?;
        let end = self.end.resolve();
        (start <= end).then(|| Span::new(start, end))
    }
}

/// A booking: a timeframe of type Booking/BookingCanceled plus booking metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub timeframe: Timeframe,
    pub author: UserId,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub booking_code: Option<String>,
    #[serde(default)]
    pub cancellation_date: Option<NaiveDateTime>,
    /// Slot size of the bookable timeframe at creation, kept for display.
    #[serde(default)]
    pub grid_size_start: Option<u32>,
    #[serde(default)]
    pub grid_size_end: Option<u32>,
}

impl Booking {
    pub fn new(
        id: TimeframeId,
        location: LocationId,
        item: ItemId,
        span: Span,
        author: UserId,
        status: PostStatus,
    ) -> Self {
        Self {
            timeframe: Timeframe {
                id,
                location_ids: BTreeSet::from([location]),
                item_ids: BTreeSet::from([item]),
                kind: TimeframeType::Booking,
                start: Some(span.start),
                end: DateBound::Bounded(span.end),
                status,
                ..Timeframe::default()
            },
            author,
            comment: None,
            booking_code: None,
            cancellation_date: None,
            grid_size_start: None,
            grid_size_end: None,
        }
    }

    pub fn id(&self) -> TimeframeId {
        self.timeframe.id
    }

    pub fn status(&self) -> PostStatus {
        self.timeframe.status
    }

    pub fn location_id(&self) -> LocationId {
        self.timeframe.location_ids.first().copied().unwrap_or_default()
    }

    pub fn item_id(&self) -> ItemId {
        self.timeframe.item_ids.first().copied().unwrap_or_default()
    }

    pub fn start(&self) -> NaiveDateTime {
        self.timeframe.start.unwrap_or_default()
    }

    pub fn end(&self) -> NaiveDateTime {
        self.timeframe.end.bounded().unwrap_or_else(|| self.start())
    }

    pub fn span(&self) -> Span {
        let start = self.start();
        Span::new(start, self.end().max(start))
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == PostStatus::Canceled
    }

    /// Portion of the booking that counts against usage limits.
    ///
    /// Canceled bookings count only when `count_canceled` is set, and only up to
    /// the moment they were canceled.
    pub fn counted_span(&self, count_canceled: bool) -> Option<Span> {
        let span = self.span();
        match self.status() {
            PostStatus::Canceled if !count_canceled => None,
            PostStatus::Canceled => {
                let cut = self.cancellation_date.unwrap_or(span.end).min(span.end);
                (cut > span.start).then(|| Span::new(span.start, cut))
            }
            _ => Some(span),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub id: LocationId,
    pub title: String,
    pub categories: BTreeSet<TermId>,
    pub admins: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub categories: BTreeSet<TermId>,
    pub admins: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub is_admin: bool,
}

/// Criteria handed to the store. Empty vectors mean "no filter on this dimension".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreFilter {
    pub location_ids: Vec<LocationId>,
    pub item_ids: Vec<ItemId>,
    pub types: Vec<TimeframeType>,
    pub statuses: Vec<PostStatus>,
    pub author: Option<UserId>,
}

impl StoreFilter {
    pub fn matches(&self, tf: &Timeframe) -> bool {
        tf.matches_locations(&self.location_ids)
            && tf.matches_items(&self.item_ids)
            && (self.types.is_empty() || self.types.contains(&tf.kind))
            && (self.statuses.is_empty() || self.statuses.contains(&tf.status))
    }

    pub fn matches_booking(&self, booking: &Booking) -> bool {
        self.matches(&booking.timeframe) && self.author.is_none_or(|a| a == booking.author)
    }
}

/// One page of a paginated range scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub posts: Vec<T>,
    pub total_pages: usize,
    pub done: bool,
}
