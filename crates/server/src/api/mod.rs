pub mod devices;
pub mod health;
pub mod openapi;
pub mod reminders;
pub mod schemas;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use remind_bus::MessageBus;
use remind_scheduler::ReminderMetrics;
use remind_state::ReminderStore;

use crate::config::ServiceConfig;
use self::openapi::ApiDoc;
use self::schemas::ErrorResponse;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The reminder store (single source of truth).
    pub store: Arc<dyn ReminderStore>,
    /// The broker; creation events are enqueued here.
    pub bus: Arc<dyn MessageBus>,
    /// Shared lifecycle counters.
    pub metrics: Arc<ReminderMetrics>,
    /// Service configuration.
    pub config: Arc<ServiceConfig>,
}

/// Build a JSON error response with the given status code.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
        .into_response()
}

/// `X-API-Key` guard. A missing `API_KEY` setting leaves the surface open
/// (development mode); health and metrics are always public.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ref expected) = state.config.api_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        next.run(request).await
    } else {
        error_response(StatusCode::UNAUTHORIZED, "invalid or missing API key")
    }
}

/// Build the Axum router with all reminder routes, middleware, and
/// Swagger UI.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/reminders/health", get(health::health))
        .route("/reminders/metrics", get(health::prometheus_metrics));

    let protected = Router::new()
        .route(
            "/reminders/",
            get(reminders::list_reminders).post(reminders::create_reminder),
        )
        .route("/reminders/stats", get(reminders::reminder_stats))
        .route(
            "/reminders/devices",
            get(devices::list_device_tokens).post(devices::register_device_token),
        )
        .route(
            "/reminders/{id}",
            get(reminders::get_reminder)
                .patch(reminders::update_reminder)
                .delete(reminders::delete_reminder),
        )
        .route("/reminders/{id}/ack", post(reminders::acknowledge_reminder))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
