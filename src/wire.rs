//! Newline-delimited JSON protocol: one request object per line, one response per line.

use std::time::Instant;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::engine::{BookingRequest, DateSelector, Engine, EngineError, TimeframeQuery, parse_date};
use crate::export::{ExportState, TimeframeExport};
use crate::model::*;
use crate::observability;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Submit {
        booking: BookingRequest,
        #[serde(default)]
        admin: bool,
    },
    Confirm {
        id: TimeframeId,
    },
    Cancel {
        id: TimeframeId,
        /// Defaults to the time the request is handled.
        #[serde(default)]
        at: Option<NaiveDateTime>,
    },
    Timeframes {
        #[serde(default)]
        location_ids: Vec<LocationId>,
        #[serde(default)]
        item_ids: Vec<ItemId>,
        #[serde(default)]
        types: Vec<TimeframeType>,
        #[serde(default)]
        date: Option<String>,
        #[serde(default)]
        only_bookable: bool,
    },
    Page {
        start: String,
        end: String,
        page: usize,
        #[serde(default)]
        page_size: Option<usize>,
        #[serde(default)]
        types: Vec<TimeframeType>,
    },
    Availability {
        location_id: LocationId,
        item_id: ItemId,
        from: String,
        to: String,
    },
    Export {
        export_type: String,
        start: String,
        end: String,
        #[serde(default)]
        paginated: bool,
        #[serde(default)]
        state: ExportState,
    },
    ValidateRules,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        body: Value,
    },
    /// The engine refused the booking; `conflicts` names the bookings in the way.
    Rejected {
        kind: &'static str,
        message: String,
        conflicts: Vec<TimeframeId>,
    },
    Error {
        kind: &'static str,
        message: String,
    },
}

impl Response {
    fn from_error(e: &EngineError) -> Self {
        if e.is_rejection() {
            Response::Rejected {
                kind: observability::error_label(e),
                message: e.to_string(),
                conflicts: e.conflicts().to_vec(),
            }
        } else {
            Response::Error {
                kind: observability::error_label(e),
                message: e.to_string(),
            }
        }
    }

    fn status_label(&self) -> &'static str {
        match self {
            Response::Ok { .. } => "ok",
            Response::Rejected { .. } => "rejected",
            Response::Error { .. } => "error",
        }
    }
}

pub fn handle_line(engine: &Engine, line: &str, now: NaiveDateTime) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(engine, request, now),
        Err(e) => Response::from_error(&EngineError::Parse(e.to_string())),
    }
}

pub fn handle(engine: &Engine, request: Request, now: NaiveDateTime) -> Response {
    let op = observability::request_label(&request);
    let started = Instant::now();
    let response = match execute(engine, request, now) {
        Ok(body) => Response::Ok { body },
        Err(e) => Response::from_error(&e),
    };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => response.status_label())
        .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    response
}

fn execute(engine: &Engine, request: Request, now: NaiveDateTime) -> Result<Value, EngineError> {
    match request {
        Request::Submit { booking, admin: false } => to_body(&engine.submit_booking(booking, now)?),
        Request::Submit { booking, admin: true } => {
            to_body(&engine.save_admin_booking(booking, now)?)
        }
        Request::Confirm { id } => to_body(&engine.confirm_booking(id)?),
        Request::Cancel { id, at } => to_body(&engine.cancel_booking(id, at.unwrap_or(now))?),
        Request::Timeframes {
            location_ids,
            item_ids,
            types,
            date,
            only_bookable,
        } => {
            let date = match date {
                Some(d) => DateSelector::Day(parse_date(&d)?),
                None => DateSelector::Any,
            };
            let query = TimeframeQuery {
                location_ids,
                item_ids,
                types,
                date,
                only_bookable,
                ..TimeframeQuery::default()
            };
            to_body(&engine.get(&query)?)
        }
        Request::Page {
            start,
            end,
            page,
            page_size,
            types,
        } => {
            let page_size = page_size.unwrap_or(engine.settings().export_page_size);
            to_body(&engine.get_in_range_paginated(
                parse_date(&start)?,
                parse_date(&end)?,
                page,
                page_size,
                &types,
            )?)
        }
        Request::Availability {
            location_id,
            item_id,
            from,
            to,
        } => to_body(&engine.availability(
            location_id,
            item_id,
            parse_date(&from)?,
            parse_date(&to)?,
        )?),
        Request::Export {
            export_type,
            start,
            end,
            paginated,
            state,
        } => {
            let mut export = TimeframeExport::new(&export_type, &start, &end)?.resume(state);
            let done = if paginated {
                export.collect_next_page(engine)?
            } else {
                export.collect_days(engine)?
            };
            Ok(json!({ "done": done, "state": to_body(export.state())? }))
        }
        Request::ValidateRules => {
            engine.validate_rules()?;
            Ok(json!({ "rules": engine.rule_set()?.len() }))
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Store(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_requests() {
        let req: Request = serde_json::from_str(r#"{"op":"confirm","id":4}"#).unwrap();
        assert_eq!(req, Request::Confirm { id: 4 });
        let req: Request = serde_json::from_str(r#"{"op":"validate_rules"}"#).unwrap();
        assert_eq!(req, Request::ValidateRules);
        let req: Request = serde_json::from_str(
            r#"{"op":"page","start":"2024-05-01","end":"2024-05-31","page":2}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::Page { page: 2, page_size: None, .. }));
    }

    #[test]
    fn rejection_carries_conflicts() {
        let e = EngineError::Overlap {
            message: "taken".into(),
            conflicts: vec![3, 5],
        };
        let value = serde_json::to_value(Response::from_error(&e)).unwrap();
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["kind"], "overlap");
        assert_eq!(value["conflicts"], json!([3, 5]));
    }

    #[test]
    fn plain_errors_are_not_rejections() {
        let value = serde_json::to_value(Response::from_error(&EngineError::NotFound(9))).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["kind"], "not_found");
    }
}
