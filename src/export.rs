//! Resumable collection of the timeframes an export has to cover.
//!
//! Exports run in chunks: interactively one request at a time, with the
//! progress carried between requests in an [`ExportState`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Engine, EngineError, TimeframeQuery, parse_date};
use crate::limits::EXPORT_ITERATION_DAYS;
use crate::model::{PostStatus, TimeframeId, TimeframeType};
use crate::observability;

/// Statuses the day-by-day export looks at.
const EXPORT_STATUSES: [PostStatus; 5] = [
    PostStatus::Canceled,
    PostStatus::Confirmed,
    PostStatus::Unconfirmed,
    PostStatus::Publish,
    PostStatus::Inherit,
];

/// Progress carried between export calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportState {
    /// Last page fetched by the paginated export.
    pub last_processed_page: Option<usize>,
    /// Day the day-by-day export resumes at.
    pub last_processed_date: Option<NaiveDate>,
    pub total_pages: Option<usize>,
    pub relevant_timeframes: Vec<TimeframeId>,
}

#[derive(Debug, Clone)]
pub struct TimeframeExport {
    /// `None` exports every type.
    export_type: Option<TimeframeType>,
    start: NaiveDate,
    end: NaiveDate,
    background: bool,
    complete: bool,
    state: ExportState,
}

impl TimeframeExport {
    /// `export_type` is `"all"` or a numeric type id. Both dates are inclusive.
    pub fn new(export_type: &str, start: &str, end: &str) -> Result<Self, EngineError> {
        let export_type = match export_type.trim() {
            "all" => None,
            other => Some(
                other
                    .parse::<u8>()
                    .ok()
                    .and_then(TimeframeType::from_id)
                    .ok_or_else(|| {
                        EngineError::Validation(format!("invalid export type: {other:?}"))
                    })?,
            ),
        };
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        if start > end {
            return Err(EngineError::Validation(
                "start date must not be after the end date".into(),
            ));
        }
        Ok(Self {
            export_type,
            start,
            end,
            background: false,
            complete: false,
            state: ExportState::default(),
        })
    }

    /// Continue from an earlier call's state.
    pub fn resume(mut self, state: ExportState) -> Self {
        self.state = state;
        self
    }

    /// Background jobs process the whole range in one go.
    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn state(&self) -> &ExportState {
        &self.state
    }

    pub fn into_state(self) -> ExportState {
        self.state
    }

    pub fn relevant_timeframes(&self) -> &[TimeframeId] {
        &self.state.relevant_timeframes
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// `(processed, total)` record estimate for the paginated export.
    pub fn progress(&self, page_size: usize) -> Option<(usize, usize)> {
        let page = self.state.last_processed_page?;
        let total = self.state.total_pages.unwrap_or(page);
        Some((page * page_size, total * page_size))
    }

    fn types(&self) -> Vec<TimeframeType> {
        match self.export_type {
            Some(t) => vec![t],
            None => TimeframeType::ALL.to_vec(),
        }
    }

    fn remember(&mut self, ids: impl IntoIterator<Item = TimeframeId>) {
        for id in ids {
            if !self.state.relevant_timeframes.contains(&id) {
                self.state.relevant_timeframes.push(id);
            }
        }
    }

    /// Walks the range day by day. Returns `true` once every day is processed.
    ///
    /// Outside background jobs a call stops after `EXPORT_ITERATION_DAYS` days and
    /// records where the next call resumes.
    pub fn collect_days(&mut self, engine: &Engine) -> Result<bool, EngineError> {
        let from = if self.background {
            self.start
        } else {
            self.state.last_processed_date.unwrap_or(self.start)
        };
        let mut counter = 0usize;
        let mut day = from;
        while day <= self.end {
            counter += 1;
            if !self.background && counter >= EXPORT_ITERATION_DAYS {
                self.state.last_processed_date = Some(day);
                metrics::counter!(observability::EXPORT_CHUNKS_TOTAL, "mode" => "days")
                    .increment(1);
                debug!("export paused at {day}");
                return Ok(false);
            }
            let query = TimeframeQuery::default()
                .with_types(&self.types())
                .with_statuses(&EXPORT_STATUSES)
                .on(day);
            let found = engine.get(&query)?;
            self.remember(found.iter().map(|tf| tf.id));
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
        metrics::counter!(observability::EXPORT_CHUNKS_TOTAL, "mode" => "days").increment(1);
        self.complete = true;
        Ok(true)
    }

    /// Fetches one page of the range scan. Returns `true` when it was the last page.
    pub fn collect_page(&mut self, engine: &Engine, page: usize) -> Result<bool, EngineError> {
        let page_size = engine.settings().export_page_size;
        let result =
            engine.get_in_range_paginated(self.start, self.end, page, page_size, &self.types())?;
        if self.state.total_pages.is_none() {
            self.state.total_pages = Some(result.total_pages);
        }
        self.state.last_processed_page = Some(page);
        self.complete = result.done;
        self.remember(result.posts.iter().map(|tf| tf.id));
        metrics::counter!(observability::EXPORT_CHUNKS_TOTAL, "mode" => "pages").increment(1);
        Ok(result.done)
    }

    /// Fetches the page after the last processed one.
    pub fn collect_next_page(&mut self, engine: &Engine) -> Result<bool, EngineError> {
        let next = self.state.last_processed_page.map_or(1, |p| p + 1);
        self.collect_page(engine, next)
    }
}
