use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total protocol requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "commons_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "commons_request_duration_seconds";

// ── Booking decisions ───────────────────────────────────────────

/// Counter: booking submissions. Labels: outcome (saved, drafted, rejected).
pub const BOOKINGS_SUBMITTED_TOTAL: &str = "commons_bookings_submitted_total";

/// Counter: rule denials. Labels: rule.
pub const BOOKINGS_DENIED_TOTAL: &str = "commons_bookings_denied_total";

/// Counter: submissions refused because they overlap existing bookings.
pub const OVERLAP_REJECTIONS_TOTAL: &str = "commons_overlap_rejections_total";

/// Counter: evaluations that allowed a booking because the rule configuration was unusable.
pub const RULES_FAIL_OPEN_TOTAL: &str = "commons_rules_fail_open_total";

/// Histogram: single rule evaluation in seconds. Labels: rule.
pub const RULE_EVALUATION_SECONDS: &str = "commons_rule_evaluation_seconds";

/// Counter: status transitions. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "commons_status_transitions_total";

// ── Export ──────────────────────────────────────────────────────

/// Counter: export chunks processed (pages or day batches). Labels: mode.
pub const EXPORT_CHUNKS_TOTAL: &str = "commons_export_chunks_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a request to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Submit { admin: false, .. } => "submit",
        Request::Submit { admin: true, .. } => "admin_save",
        Request::Confirm { .. } => "confirm",
        Request::Cancel { .. } => "cancel",
        Request::Timeframes { .. } => "timeframes",
        Request::Page { .. } => "page",
        Request::Availability { .. } => "availability",
        Request::Export { .. } => "export",
        Request::ValidateRules => "validate_rules",
    }
}

/// Map an error to a short label for metrics.
pub fn error_label(e: &EngineError) -> &'static str {
    match e {
        EngineError::Configuration(_) => "configuration",
        EngineError::Overlap { .. } => "overlap",
        EngineError::BookingDenied { .. } => "denied",
        EngineError::Unavailable { .. } => "unavailable",
        EngineError::Validation(_) => "validation",
        EngineError::Parse(_) => "parse",
        EngineError::NotFound(_) => "not_found",
        EngineError::Store(_) => "store",
    }
}
