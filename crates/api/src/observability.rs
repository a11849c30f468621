use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use fieldreport_domain::distribution::DistributionOutcome;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "fieldreport_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "fieldreport_api_http_request_duration_seconds";
const HTTP_REQUEST_ERRORS_TOTAL: &str = "fieldreport_api_http_errors_total";
const BOT_UPDATES_TOTAL: &str = "fieldreport_bot_updates_total";
const BOT_POLL_ERRORS_TOTAL: &str = "fieldreport_bot_poll_errors_total";
const BOT_DROPPED_EVENTS_TOTAL: &str = "fieldreport_bot_dropped_events_total";
const BOT_ACTIVE_WORKERS: &str = "fieldreport_bot_active_workers";
const SESSIONS_EXPIRED_TOTAL: &str = "fieldreport_sessions_expired_total";
const REPORT_SUBMISSIONS_TOTAL: &str = "fieldreport_report_submissions_total";
const CHANNEL_DELIVERIES_TOTAL: &str = "fieldreport_channel_deliveries_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16().to_string();
    let duration_seconds = elapsed.as_secs_f64();
    let result = if status.is_server_error() {
        "error"
    } else {
        "success"
    };

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone(),
        "result" => result
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code
    )
    .record(duration_seconds);

    if status.is_server_error() {
        counter!(
            HTTP_REQUEST_ERRORS_TOTAL,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);
    }
}

pub fn register_bot_update(kind: &str) {
    counter!(BOT_UPDATES_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn register_bot_poll_error() {
    counter!(BOT_POLL_ERRORS_TOTAL).increment(1);
}

pub fn register_dropped_event() {
    counter!(BOT_DROPPED_EVENTS_TOTAL).increment(1);
}

pub fn set_active_workers(count: usize) {
    gauge!(BOT_ACTIVE_WORKERS).set(count as f64);
}

pub fn register_expired_sessions(count: usize) {
    counter!(SESSIONS_EXPIRED_TOTAL).increment(count as u64);
}

/// `result` is `accepted` or `persistence_failed`.
pub fn register_submission(result: &str) {
    counter!(REPORT_SUBMISSIONS_TOTAL, "result" => result.to_string()).increment(1);
}

pub fn register_distribution(outcome: &DistributionOutcome) {
    for (channel, channel_outcome) in &outcome.per_channel {
        counter!(
            CHANNEL_DELIVERIES_TOTAL,
            "channel" => channel.clone(),
            "outcome" => channel_outcome.as_str()
        )
        .increment(1);
    }
}
