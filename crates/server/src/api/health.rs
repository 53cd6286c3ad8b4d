//! Health probe and Prometheus metrics endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use remind_scheduler::MetricsSnapshot;

use super::AppState;
use super::schemas::HealthResponse;

/// Prometheus text exposition format content type.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `GET /reminders/health` -- health probe.
#[utoipa::path(
    get,
    path = "/reminders/health",
    tag = "Health",
    summary = "Health check",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(clippy::unused_async)]
pub async fn health() -> Response {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".into(),
            service: "reminders".into(),
        }),
    )
        .into_response()
}

/// `GET /reminders/metrics` -- lifecycle counters in Prometheus text
/// exposition format. Returns 404 when metrics are disabled.
#[utoipa::path(
    get,
    path = "/reminders/metrics",
    tag = "Health",
    summary = "Prometheus metrics",
    responses(
        (status = 200, description = "Prometheus text format metrics", content_type = "text/plain"),
        (status = 404, description = "Metrics disabled"),
    )
)]
#[allow(clippy::unused_async)]
pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    if !state.config.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    let snap = state.metrics.snapshot();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        render_snapshot(&snap),
    )
        .into_response()
}

/// Render a [`MetricsSnapshot`] into Prometheus text exposition format.
///
/// Extracted from the handler so it can be unit tested without `AppState`.
fn render_snapshot(snap: &MetricsSnapshot) -> String {
    let mut buf = String::with_capacity(2048);

    write_counter(
        &mut buf,
        "reminders_created_total",
        "Total reminders created via ingestion.",
        snap.created,
    );
    write_counter(
        &mut buf,
        "reminders_idempotent_hits_total",
        "Creates that matched an existing external_id.",
        snap.idempotent_hits,
    );
    write_counter(
        &mut buf,
        "reminders_acknowledged_total",
        "Total reminders acknowledged by clients.",
        snap.acknowledged,
    );
    write_counter(
        &mut buf,
        "reminder_scheduler_scans_total",
        "Total scheduler scan cycles.",
        snap.scheduler_scans,
    );
    write_counter(
        &mut buf,
        "reminder_scheduler_dispatched_total",
        "Total reminders dispatched by the scheduler.",
        snap.scheduler_dispatched,
    );
    write_counter(
        &mut buf,
        "reminder_occurrences_generated_total",
        "Occurrences materialized from recurring templates.",
        snap.occurrences_generated,
    );
    write_counter(
        &mut buf,
        "reminders_suppressed_total",
        "Reminders skipped by suppression rules.",
        snap.suppressed,
    );
    write_counter(
        &mut buf,
        "reminders_publish_failures_total",
        "Dispatch events that failed to publish.",
        snap.publish_failures,
    );
    write_counter(
        &mut buf,
        "reminders_ingest_failures_total",
        "Creation events dropped or failed in ingestion.",
        snap.ingest_failures,
    );
    write_counter(
        &mut buf,
        "reminders_dispatch_success_total",
        "Total successful push dispatches.",
        snap.dispatch_success,
    );
    write_counter(
        &mut buf,
        "reminders_dispatch_failed_total",
        "Total failed push dispatches.",
        snap.dispatch_failed,
    );
    write_counter(
        &mut buf,
        "reminders_expired_cleaned_total",
        "Rows deactivated by expiration cleanup.",
        snap.expired_cleaned,
    );

    buf
}

fn write_counter(buf: &mut String, name: &str, help: &str, value: u64) {
    buf.push_str("# HELP ");
    buf.push_str(name);
    buf.push(' ');
    buf.push_str(help);
    buf.push_str("\n# TYPE ");
    buf.push_str(name);
    buf.push_str(" counter\n");
    buf.push_str(name);
    buf.push(' ');
    buf.push_str(&value.to_string());
    buf.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_renders_all_counters() {
        let snap = MetricsSnapshot {
            created: 3,
            dispatch_success: 2,
            ..Default::default()
        };
        let text = render_snapshot(&snap);
        assert!(text.contains("# TYPE reminders_created_total counter"));
        assert!(text.contains("reminders_created_total 3"));
        assert!(text.contains("reminders_dispatch_success_total 2"));
        assert!(text.contains("reminders_dispatch_failed_total 0"));
    }
}
