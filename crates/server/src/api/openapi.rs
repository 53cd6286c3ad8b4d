use utoipa::OpenApi;

use remind_core::{
    CreateReminder, DeviceToken, DeviceTokenRegistration, Platform, QueuedReminder,
    RecurrencePattern, Reminder, ReminderPatch, ReminderStatus,
};

use super::schemas::{AckResponse, ErrorResponse, HealthResponse, StatsResponse};

/// OpenAPI document for the reminders surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Reminders Service API",
        description = "Durable, recurrence-aware reminder scheduling with push dispatch."
    ),
    paths(
        super::reminders::create_reminder,
        super::reminders::list_reminders,
        super::reminders::reminder_stats,
        super::reminders::get_reminder,
        super::reminders::update_reminder,
        super::reminders::delete_reminder,
        super::reminders::acknowledge_reminder,
        super::devices::list_device_tokens,
        super::devices::register_device_token,
        super::health::health,
        super::health::prometheus_metrics,
    ),
    components(schemas(
        CreateReminder,
        QueuedReminder,
        Reminder,
        ReminderPatch,
        ReminderStatus,
        RecurrencePattern,
        Platform,
        DeviceToken,
        DeviceTokenRegistration,
        AckResponse,
        ErrorResponse,
        HealthResponse,
        StatsResponse,
    )),
    tags(
        (name = "Reminders", description = "Reminder lifecycle"),
        (name = "Devices", description = "Push token registration"),
        (name = "Health", description = "Probes and metrics"),
    )
)]
pub struct ApiDoc;
