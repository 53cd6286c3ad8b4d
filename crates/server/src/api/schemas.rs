use serde::Serialize;
use utoipa::ToSchema;

use remind_state::ReminderStats;

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

/// Response for the acknowledgement endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct AckResponse {
    pub acknowledged: bool,
}

/// Health probe response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `"healthy"` when the service is up.
    pub status: String,
    pub service: String,
}

/// Aggregate reminder counts.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_reminders: u64,
    pub one_time_reminders: u64,
    pub recurring_reminders: u64,
    pub active_recurring: u64,
    pub pending_reminders: u64,
    pub processed_reminders: u64,
}

impl From<ReminderStats> for StatsResponse {
    fn from(stats: ReminderStats) -> Self {
        Self {
            total_reminders: stats.total_reminders,
            one_time_reminders: stats.one_time_reminders,
            recurring_reminders: stats.recurring_reminders,
            active_recurring: stats.active_recurring,
            pending_reminders: stats.pending_reminders,
            processed_reminders: stats.processed_reminders,
        }
    }
}
