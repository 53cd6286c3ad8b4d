//! Reminder CRUD, acknowledgement, and stats endpoints.
//!
//! Creation is asynchronous: the endpoint validates and enqueues the event,
//! and the ingestion worker performs the insert. Everything else reads or
//! mutates the store directly.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use remind_core::{
    CreateReminder, QueuedReminder, Reminder, ReminderFilter, ReminderPatch, ReminderStatus,
};
use remind_state::StateError;

use super::schemas::{AckResponse, ErrorResponse, StatsResponse};
use super::{AppState, error_response};

/// Query parameters for listing reminders.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListParams {
    /// Filter by owner.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Filter by status (`Pending`, `Queued`, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Filter templates vs one-time rows.
    #[serde(default)]
    pub is_recurring: Option<bool>,
    /// Filter by template lifecycle flag.
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Inclusive lower bound on `reminder_time`.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `reminder_time`.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Maximum number of results (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Query parameters for the stats endpoint.
#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsParams {
    /// Scope the counts to one user.
    #[serde(default)]
    pub user_id: Option<String>,
}

fn state_error(e: &StateError) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
}

/// `POST /reminders/` -- enqueue a reminder creation.
#[utoipa::path(
    post,
    path = "/reminders/",
    tag = "Reminders",
    summary = "Enqueue a reminder creation",
    description = "Validates the creation event, synthesizes an idempotency key when absent, and publishes it to the input queue. The row is created asynchronously by the ingestion worker.",
    request_body(content = CreateReminder, description = "Reminder creation event"),
    responses(
        (status = 200, description = "Creation enqueued", body = QueuedReminder),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Broker unavailable", body = ErrorResponse),
    )
)]
pub async fn create_reminder(
    State(state): State<AppState>,
    Json(mut event): Json<CreateReminder>,
) -> Response {
    if let Err(e) = event.validate() {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }

    let now = Utc::now();
    if event.external_id.is_none() {
        event.external_id = Some(event.synthesized_external_id(now));
    }
    let external_id = event.external_id.clone().unwrap_or_default();

    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => payload,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    match state
        .bus
        .publish(&state.config.input_routing_key, &payload)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(QueuedReminder {
                external_id,
                queued_at: now,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to enqueue creation event");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to enqueue reminder")
        }
    }
}

/// `GET /reminders/` -- list reminders with filters.
#[utoipa::path(
    get,
    path = "/reminders/",
    tag = "Reminders",
    summary = "List reminders",
    params(ListParams),
    responses(
        (status = 200, description = "Matching reminders", body = [Reminder]),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn list_reminders(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match params.status.as_deref() {
        Some(raw) => match raw.parse::<ReminderStatus>() {
            Ok(status) => Some(status),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        },
        None => None,
    };

    let filter = ReminderFilter {
        user_id: params.user_id,
        status,
        is_recurring: params.is_recurring,
        is_active: params.is_active,
        start: params.start,
        end: params.end,
        limit: params.limit,
    };

    match state.store.list_reminders(&filter).await {
        Ok(reminders) => (StatusCode::OK, Json(reminders)).into_response(),
        Err(e) => state_error(&e),
    }
}

/// `GET /reminders/stats` -- aggregate reminder counts.
#[utoipa::path(
    get,
    path = "/reminders/stats",
    tag = "Reminders",
    summary = "Reminder statistics",
    params(StatsParams),
    responses(
        (status = 200, description = "Aggregate counts", body = StatsResponse),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn reminder_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Response {
    match state.store.reminder_stats(params.user_id.as_deref()).await {
        Ok(stats) => (StatusCode::OK, Json(StatsResponse::from(stats))).into_response(),
        Err(e) => state_error(&e),
    }
}

/// `GET /reminders/{id}` -- fetch one reminder.
#[utoipa::path(
    get,
    path = "/reminders/{id}",
    tag = "Reminders",
    summary = "Fetch a reminder",
    params(("id" = Uuid, Path, description = "Reminder id")),
    responses(
        (status = 200, description = "The reminder", body = Reminder),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn get_reminder(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.store.get_reminder(id).await {
        Ok(Some(reminder)) => (StatusCode::OK, Json(reminder)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, &format!("reminder not found: {id}")),
        Err(e) => state_error(&e),
    }
}

/// Apply a patch to a loaded reminder. Recurrence fields only apply to
/// templates; a pattern change recomputes the next occurrence from the
/// last one (or the start date for templates that never fired).
fn apply_patch(reminder: &mut Reminder, patch: ReminderPatch, now: DateTime<Utc>) -> Result<(), String> {
    if let Some(title) = patch.title {
        reminder.title = Some(title);
    }
    if let Some(message) = patch.message {
        reminder.message = Some(message);
    }
    if let Some(payload) = patch.payload {
        reminder.payload = payload;
    }
    if let Some(reminder_time) = patch.reminder_time {
        reminder.reminder_time = reminder_time;
    }
    if let Some(status) = patch.status {
        reminder.status = status;
    }

    if reminder.is_recurring {
        if let Some(pattern) = patch.recurrence_pattern {
            pattern.validate().map_err(|e| e.to_string())?;
            let base = reminder
                .last_occurrence
                .or(reminder.start_date)
                .unwrap_or(reminder.reminder_time);
            reminder.next_occurrence = pattern.next_after(base, now);
            reminder.recurrence_pattern = Some(pattern);
        }
        if let Some(end_date) = patch.end_date {
            reminder.end_date = Some(end_date);
        }
        if let Some(timezone) = patch.timezone {
            reminder.timezone = Some(timezone);
        }
        if let Some(is_active) = patch.is_active {
            reminder.is_active = is_active;
        }
    }

    reminder.updated_at = now;
    Ok(())
}

/// `PATCH /reminders/{id}` -- update fields, including recurrence.
#[utoipa::path(
    patch,
    path = "/reminders/{id}",
    tag = "Reminders",
    summary = "Update a reminder",
    params(("id" = Uuid, Path, description = "Reminder id")),
    request_body(content = ReminderPatch, description = "Fields to update"),
    responses(
        (status = 200, description = "Updated reminder", body = Reminder),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn update_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ReminderPatch>,
) -> Response {
    let mut reminder = match state.store.get_reminder(id).await {
        Ok(Some(reminder)) => reminder,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, &format!("reminder not found: {id}"));
        }
        Err(e) => return state_error(&e),
    };

    // A no-op patch returns the row unchanged.
    if patch.is_empty() {
        return (StatusCode::OK, Json(reminder)).into_response();
    }

    if let Err(e) = apply_patch(&mut reminder, patch, Utc::now()) {
        return error_response(StatusCode::BAD_REQUEST, &e);
    }

    match state.store.update_reminder(&reminder).await {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(StateError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, &format!("reminder not found: {id}"))
        }
        Err(e) => state_error(&e),
    }
}

/// `DELETE /reminders/{id}` -- hard delete.
#[utoipa::path(
    delete,
    path = "/reminders/{id}",
    tag = "Reminders",
    summary = "Delete a reminder",
    params(("id" = Uuid, Path, description = "Reminder id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn delete_reminder(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.store.delete_reminder(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, &format!("reminder not found: {id}")),
        Err(e) => state_error(&e),
    }
}

/// `POST /reminders/{id}/ack` -- mark acknowledged. Idempotent.
#[utoipa::path(
    post,
    path = "/reminders/{id}/ack",
    tag = "Reminders",
    summary = "Acknowledge a reminder",
    params(("id" = Uuid, Path, description = "Reminder id")),
    responses(
        (status = 200, description = "Acknowledged", body = AckResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn acknowledge_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.mark_acknowledged(id, Utc::now()).await {
        Ok(true) => {
            state.metrics.increment_acknowledged();
            (StatusCode::OK, Json(AckResponse { acknowledged: true })).into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, &format!("reminder not found: {id}")),
        Err(e) => state_error(&e),
    }
}
