use std::sync::PoisonError;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::grid;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::validate_span;
use super::{Engine, EngineError};

/// A booking as submitted by a user or an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Set when editing an existing booking.
    #[serde(default)]
    pub id: Option<TimeframeId>,
    pub location_id: LocationId,
    pub item_id: ItemId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub author: UserId,
    /// Defaults to unconfirmed.
    #[serde(default)]
    pub status: Option<PostStatus>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved { booking: Booking },
    /// The admin's booking was rejected and kept as a draft instead.
    Drafted { booking: Booking, warning: String },
}

impl SaveOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            SaveOutcome::Saved { booking } | SaveOutcome::Drafted { booking, .. } => booking,
        }
    }
}

impl Engine {
    /// Validates and stores a booking, refusing it on any conflict.
    pub fn submit_booking(
        &self,
        request: BookingRequest,
        now: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        let lock = self.slot_lock(request.location_id, request.item_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (booking, bookable) = self.prepare_booking(&request)?;
        if let Err(e) = self.check_booking(&booking, &bookable, now) {
            metrics::counter!(observability::BOOKINGS_SUBMITTED_TOTAL, "outcome" => "rejected")
                .increment(1);
            info!(
                "booking request by user {} for item {} rejected: {}",
                request.author,
                request.item_id,
                observability::error_label(&e)
            );
            return Err(e);
        }
        let saved = self.persist(booking)?;
        metrics::counter!(observability::BOOKINGS_SUBMITTED_TOTAL, "outcome" => "saved")
            .increment(1);
        info!(
            "booking {} saved for user {} ({})",
            saved.id(),
            saved.author,
            saved.status().as_str()
        );
        Ok(saved)
    }

    /// Admin save: a rejected booking is stored as a draft with a warning instead of failing.
    pub fn save_admin_booking(
        &self,
        request: BookingRequest,
        now: NaiveDateTime,
    ) -> Result<SaveOutcome, EngineError> {
        let lock = self.slot_lock(request.location_id, request.item_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (mut booking, bookable) = self.prepare_booking(&request)?;
        match self.check_booking(&booking, &bookable, now) {
            Ok(()) => {
                let booking = self.persist(booking)?;
                metrics::counter!(observability::BOOKINGS_SUBMITTED_TOTAL, "outcome" => "saved")
                    .increment(1);
                Ok(SaveOutcome::Saved { booking })
            }
            Err(e) if e.is_rejection() => {
                booking.timeframe.status = PostStatus::Draft;
                let booking = self.persist(booking)?;
                metrics::counter!(observability::BOOKINGS_SUBMITTED_TOTAL, "outcome" => "drafted")
                    .increment(1);
                warn!("booking {} set to draft: {}", booking.id(), observability::error_label(&e));
                Ok(SaveOutcome::Drafted {
                    booking,
                    warning: format!("{e}\nThis booking has been set to draft."),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub fn confirm_booking(&self, id: TimeframeId) -> Result<Booking, EngineError> {
        let mut booking = self.store.booking(id)?.ok_or(EngineError::NotFound(id))?;
        if booking.status() != PostStatus::Unconfirmed {
            return Err(EngineError::Validation(format!(
                "booking {id} is {} and cannot be confirmed",
                booking.status().as_str()
            )));
        }
        let lock = self.slot_lock(booking.location_id(), booking.item_id());
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.validate_booking_parameters(
            Some(id),
            booking.location_id(),
            booking.item_id(),
            booking.span(),
        )?;
        booking.timeframe.status = PostStatus::Confirmed;
        let booking = self.store.update_booking(booking)?;
        metrics::counter!(observability::STATUS_TRANSITIONS_TOTAL, "to" => "confirmed").increment(1);
        info!("booking {id} confirmed");
        Ok(booking)
    }

    /// Cancels an open booking. It stays in the store with its cancellation time.
    pub fn cancel_booking(
        &self,
        id: TimeframeId,
        at: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        let mut booking = self.store.booking(id)?.ok_or(EngineError::NotFound(id))?;
        if !matches!(
            booking.status(),
            PostStatus::Unconfirmed | PostStatus::Confirmed
        ) {
            return Err(EngineError::Validation(format!(
                "booking {id} is {} and cannot be canceled",
                booking.status().as_str()
            )));
        }
        booking.timeframe.status = PostStatus::Canceled;
        booking.cancellation_date = Some(at);
        let booking = self.store.update_booking(booking)?;
        metrics::counter!(observability::STATUS_TRANSITIONS_TOTAL, "to" => "canceled").increment(1);
        info!("booking {id} canceled");
        Ok(booking)
    }

    fn persist(&self, booking: Booking) -> Result<Booking, EngineError> {
        if booking.id() == UNSAVED_ID {
            self.store.insert_booking(booking)
        } else {
            self.store.update_booking(booking)
        }
    }

    /// Builds the booking to store from a request, before any conflict checks.
    fn prepare_booking(
        &self,
        request: &BookingRequest,
    ) -> Result<(Booking, Timeframe), EngineError> {
        let status = request.status.unwrap_or(PostStatus::Unconfirmed);
        if !matches!(
            status,
            PostStatus::Unconfirmed | PostStatus::Confirmed | PostStatus::Canceled
        ) {
            return Err(EngineError::Validation(format!(
                "a booking cannot be submitted as {}",
                status.as_str()
            )));
        }
        validate_span(&Span {
            start: request.start,
            end: request.end,
        })?;
        if request
            .comment
            .as_ref()
            .is_some_and(|c| c.len() > MAX_COMMENT_LEN)
        {
            return Err(EngineError::Validation("comment too long".into()));
        }
        if self.store.location(request.location_id)?.is_none() {
            return Err(EngineError::Validation(format!(
                "location {} does not exist",
                request.location_id
            )));
        }
        if self.store.item(request.item_id)?.is_none() {
            return Err(EngineError::Validation(format!(
                "item {} does not exist",
                request.item_id
            )));
        }
        if self.store.user(request.author)?.is_none() {
            return Err(EngineError::Validation(format!(
                "user {} does not exist",
                request.author
            )));
        }

        let bookable = self
            .get_bookable_timeframe(request.location_id, request.item_id, request.start)?
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "item {} is not bookable at location {} on {}",
                    request.item_id,
                    request.location_id,
                    request.start.date()
                ))
            })?;

        let mut booking = match request.id {
            Some(id) => {
                let existing = self.store.booking(id)?.ok_or(EngineError::NotFound(id))?;
                if existing.author != request.author {
                    return Err(EngineError::Validation(format!(
                        "booking {id} belongs to another user"
                    )));
                }
                existing
            }
            None => Booking::new(
                UNSAVED_ID,
                request.location_id,
                request.item_id,
                Span::new(request.start, request.end),
                request.author,
                status,
            ),
        };

        let tf = &mut booking.timeframe;
        tf.location_ids = [request.location_id].into();
        tf.item_ids = [request.item_id].into();
        tf.status = status;
        tf.full_day = bookable.full_day;
        tf.grid = bookable.grid;
        tf.start_time = bookable.start_time;
        tf.end_time = bookable.end_time;
        let (start, end) = if bookable.full_day {
            (start_of_day(request.start.date()), end_of_day(request.end.date()))
        } else {
            (request.start, request.end)
        };
        tf.start = Some(start);
        tf.end = DateBound::Bounded(end);
        if request.comment.is_some() {
            booking.comment = request.comment.clone();
        }
        validate_span(&booking.span())?;
        self.capture_grid_sizes(&mut booking)?;
        Ok((booking, bookable))
    }

    /// Remembers the slot sizes of slot-grid timeframes so display survives later edits to them.
    fn capture_grid_sizes(&self, booking: &mut Booking) -> Result<(), EngineError> {
        if booking.timeframe.full_day || booking.timeframe.grid > 0 {
            return Ok(());
        }
        let (location, item) = (booking.location_id(), booking.item_id());
        if let Some(tf) = self.get_bookable_timeframe(location, item, booking.start())?
            && tf.grid == 0
        {
            booking.grid_size_start = Some(grid::grid_size(&tf));
        }
        if let Some(tf) = self.get_bookable_timeframe(location, item, booking.end())?
            && tf.grid == 0
        {
            booking.grid_size_end = Some(grid::grid_size(&tf));
        }
        Ok(())
    }

    /// Every check a booking has to pass before it is stored.
    fn check_booking(
        &self,
        booking: &Booking,
        bookable: &Timeframe,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        if booking.is_canceled() {
            return Ok(());
        }
        let span = booking.span();
        let editing = (booking.id() != UNSAVED_ID).then_some(booking.id());
        self.validate_booking_parameters(editing, booking.location_id(), booking.item_id(), span)?;

        if let Some((date, tf)) =
            self.blocking_timeframe(booking.location_id(), booking.item_id(), &span)?
        {
            return Err(EngineError::Unavailable {
                date,
                kind: tf.kind,
                timeframe: tf.id,
            });
        }

        if !self.is_user_privileged(booking)? {
            if let Some(max) = bookable.max_days
                && span.days_rounded_up() > i64::from(max)
            {
                return Err(EngineError::Validation(format!(
                    "bookings are limited to {max} days"
                )));
            }
            if let Some(days) = bookable.advance_booking_days
                && now
                    .date()
                    .checked_add_signed(Duration::days(i64::from(days)))
                    .is_some_and(|latest| span.start.date() > latest)
            {
                return Err(EngineError::Validation(format!(
                    "this item can only be booked {days} days in advance"
                )));
            }
        }

        self.booking_conforms_to_rules(booking)
    }
}
