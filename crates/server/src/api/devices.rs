//! Device token registration and listing.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use remind_core::{DeviceToken, DeviceTokenRegistration, Platform};

use super::schemas::ErrorResponse;
use super::{AppState, error_response};

/// Query parameters for listing device tokens.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListTokenParams {
    /// Filter by owner.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Filter by platform (`ios`, `android`, `web`).
    #[serde(default)]
    pub platform: Option<String>,
    /// Maximum number of results (default 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// `GET /reminders/devices` -- list registered device tokens.
#[utoipa::path(
    get,
    path = "/reminders/devices",
    tag = "Devices",
    summary = "List device tokens",
    params(ListTokenParams),
    responses(
        (status = 200, description = "Registered tokens", body = [DeviceToken]),
        (status = 400, description = "Invalid platform filter", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn list_device_tokens(
    State(state): State<AppState>,
    Query(params): Query<ListTokenParams>,
) -> Response {
    let platform = match params.platform.as_deref() {
        Some(raw) => match raw.parse::<Platform>() {
            Ok(platform) => Some(platform),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        },
        None => None,
    };

    match state
        .store
        .list_device_tokens(params.user_id.as_deref(), platform, params.limit)
        .await
    {
        Ok(tokens) => (StatusCode::OK, Json(tokens)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// `POST /reminders/devices` -- register or replace a token.
#[utoipa::path(
    post,
    path = "/reminders/devices",
    tag = "Devices",
    summary = "Register a device token",
    description = "Upserts the token for (user_id, platform); the stored token is replaced.",
    request_body(content = DeviceTokenRegistration, description = "Token registration"),
    responses(
        (status = 200, description = "Stored token row", body = DeviceToken),
        (status = 500, description = "Store error", body = ErrorResponse),
    )
)]
pub async fn register_device_token(
    State(state): State<AppState>,
    Json(registration): Json<DeviceTokenRegistration>,
) -> Response {
    match state
        .store
        .upsert_device_token(registration, Utc::now())
        .await
    {
        Ok(token) => (StatusCode::OK, Json(token)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
