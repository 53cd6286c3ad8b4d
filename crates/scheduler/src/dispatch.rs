use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use remind_bus::MessageBus;
use remind_core::{DispatchEvent, Platform};
use remind_push::{PushClient, PushMessage};
use remind_state::{ReminderStore, UserProfileSource};

use crate::metrics::ReminderMetrics;
use crate::timezone::resolve_user_timezone;

/// Consumes dispatch events from the output queue and sends pushes.
///
/// Push failures never bounce the message back to the queue; they are
/// counted and the event is acknowledged, so a flaky provider cannot
/// create a redelivery storm. The worker marks the reminder `Processed`
/// on a successful send; failed sends leave the scheduler's `Queued`
/// status in place.
pub struct DispatchWorker {
    store: Arc<dyn ReminderStore>,
    bus: Arc<dyn MessageBus>,
    push: Arc<dyn PushClient>,
    profiles: Arc<dyn UserProfileSource>,
    metrics: Arc<ReminderMetrics>,
    queue: String,
    default_timezone: chrono_tz::Tz,
}

impl DispatchWorker {
    #[must_use]
    pub fn new(
        store: Arc<dyn ReminderStore>,
        bus: Arc<dyn MessageBus>,
        push: Arc<dyn PushClient>,
        profiles: Arc<dyn UserProfileSource>,
        metrics: Arc<ReminderMetrics>,
        queue: impl Into<String>,
        default_timezone: chrono_tz::Tz,
    ) -> Self {
        Self {
            store,
            bus,
            push,
            profiles,
            metrics,
            queue: queue.into(),
            default_timezone,
        }
    }

    /// Consume the output queue until the stream ends.
    ///
    /// # Errors
    ///
    /// Returns a [`remind_bus::BusError`] if the queue cannot be consumed.
    pub async fn run(&self) -> Result<(), remind_bus::BusError> {
        let mut stream = self.bus.consume(&self.queue).await?;
        info!(queue = %self.queue, provider = self.push.name(), "dispatch worker consuming");

        while let Some(delivery) = stream.next().await {
            match serde_json::from_slice::<DispatchEvent>(delivery.payload()) {
                Ok(event) => self.handle(&event, Utc::now()).await,
                Err(e) => {
                    warn!(error = %e, "dropping malformed dispatch event");
                    self.metrics.increment_dispatch_failed();
                }
            }
            if let Err(e) = delivery.ack().await {
                warn!(error = %e, "failed to ack dispatch event");
            }
        }

        info!(queue = %self.queue, "dispatch worker stream ended");
        Ok(())
    }

    /// Deliver one dispatch event: resolve the destination token, build
    /// the push payload with UTC and user-local timestamps, and send.
    pub async fn handle(&self, event: &DispatchEvent, now: DateTime<Utc>) {
        let token = match event.inline_token() {
            Some(token) => Some(token.to_owned()),
            None => match self
                .store
                .latest_token(&event.user_id, Platform::Ios)
                .await
            {
                Ok(token) => token.map(|t| t.fcm_token),
                Err(e) => {
                    warn!(user_id = %event.user_id, error = %e, "token lookup failed");
                    None
                }
            },
        };
        let Some(token) = token else {
            debug!(user_id = %event.user_id, "no device token registered, dropping push");
            self.metrics.increment_dispatch_failed();
            return;
        };

        let timestamp_utc = event.timestamp.to_rfc3339();
        let tz =
            resolve_user_timezone(&event.user_id, self.profiles.as_ref(), self.default_timezone)
                .await;
        let timestamp_local = event.timestamp.with_timezone(&tz).to_rfc3339();

        // Fresh per send; doubles as the platform collapse key so the OS
        // never coalesces distinct reminders.
        let notification_id = Uuid::new_v4().to_string();

        let title = event.payload.get("title").and_then(Value::as_str);
        let body = event.payload.get("message").and_then(Value::as_str);

        let message = PushMessage::new(token, title, body, notification_id.clone())
            .with_data("reminder_id", event.reminder_id.to_string())
            .with_data("reminder_type", event.reminder_type.clone())
            .with_data("timestamp_utc", timestamp_utc)
            .with_data("timestamp_local", timestamp_local)
            .with_data("notification_id", notification_id);

        match self.push.send(&message).await {
            Ok(provider_id) => {
                debug!(
                    reminder_id = %event.reminder_id,
                    provider_id = %provider_id,
                    "push sent"
                );
                self.metrics.increment_dispatch_success();
                if let Err(e) = self.store.mark_processed(event.reminder_id, now).await {
                    warn!(reminder_id = %event.reminder_id, error = %e, "failed to mark processed");
                }
            }
            Err(e) => {
                warn!(reminder_id = %event.reminder_id, error = %e, "push send failed");
                self.metrics.increment_dispatch_failed();
            }
        }
    }
}
