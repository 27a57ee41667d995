use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{TimeframeId, TimeframeType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Rule configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The candidate overlaps existing bookings of the same location and item.
    #[error("{message}")]
    Overlap {
        message: String,
        conflicts: Vec<TimeframeId>,
    },

    /// A booking rule refused the candidate.
    #[error("{message}")]
    BookingDenied {
        rule: &'static str,
        message: String,
        conflicts: Vec<TimeframeId>,
    },

    #[error("not bookable on {date}: {}", .kind.label())]
    Unavailable {
        date: NaiveDate,
        kind: TimeframeType,
        timeframe: TimeframeId,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(TimeframeId),

    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Ids of the bookings a rejection refers to, if any.
    pub fn conflicts(&self) -> &[TimeframeId] {
        match self {
            EngineError::Overlap { conflicts, .. }
            | EngineError::BookingDenied { conflicts, .. } => conflicts,
            _ => &[],
        }
    }

    /// Rejections an admin save turns into a draft instead of failing.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::Overlap { .. }
                | EngineError::BookingDenied { .. }
                | EngineError::Unavailable { .. }
        )
    }
}
