use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use tracing::{debug, info, warn};

use remind_bus::MessageBus;
use remind_core::{CreateReminder, Reminder, ValidationError};
use remind_state::{CreateOutcome, ReminderStore, StateError};

use crate::metrics::ReminderMetrics;

/// Errors from creating a reminder out of a creation event.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The event itself is malformed; retrying can never succeed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The store rejected the insert; retrying may succeed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Create a reminder from a creation event, using the same semantics as
/// direct API calls: validate, synthesize the idempotency key when absent,
/// and insert one-time rows or recurring templates accordingly.
///
/// # Errors
///
/// Returns [`IngestError::Validation`] for malformed events and
/// [`IngestError::State`] for store failures.
pub async fn create_from_event(
    store: &dyn ReminderStore,
    event: &CreateReminder,
    now: DateTime<Utc>,
    one_time_grace: Duration,
) -> Result<CreateOutcome, IngestError> {
    event.validate()?;

    let mut event = event.clone();
    if event.external_id.is_none() {
        event.external_id = Some(event.synthesized_external_id(now));
    }

    let reminder = if event.is_recurring() {
        Reminder::template(&event, now)?
    } else {
        Reminder::one_time(&event, now, one_time_grace)?
    };

    Ok(store.create_reminder(reminder).await?)
}

/// Consumes reminder-creation events from the input queue.
///
/// Late-ack: a message is acknowledged only after the row is safely
/// upserted. Malformed events are dropped (acked) so they cannot poison
/// the queue; store failures are rejected for redelivery, which is safe
/// because `external_id` dedupes.
pub struct IngestWorker {
    store: Arc<dyn ReminderStore>,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<ReminderMetrics>,
    queue: String,
    one_time_grace: Duration,
}

impl IngestWorker {
    #[must_use]
    pub fn new(
        store: Arc<dyn ReminderStore>,
        bus: Arc<dyn MessageBus>,
        metrics: Arc<ReminderMetrics>,
        queue: impl Into<String>,
        one_time_grace: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            metrics,
            queue: queue.into(),
            one_time_grace,
        }
    }

    /// Consume the input queue until the stream ends.
    ///
    /// # Errors
    ///
    /// Returns a [`remind_bus::BusError`] if the queue cannot be consumed.
    pub async fn run(&self) -> Result<(), remind_bus::BusError> {
        let mut stream = self.bus.consume(&self.queue).await?;
        info!(queue = %self.queue, "ingest worker consuming");

        while let Some(delivery) = stream.next().await {
            let event = match serde_json::from_slice::<CreateReminder>(delivery.payload()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "dropping malformed creation event");
                    self.metrics.increment_ingest_failures();
                    if let Err(e) = delivery.ack().await {
                        warn!(error = %e, "failed to ack poison message");
                    }
                    continue;
                }
            };

            match create_from_event(
                self.store.as_ref(),
                &event,
                Utc::now(),
                self.one_time_grace,
            )
            .await
            {
                Ok(outcome) => {
                    if outcome.is_existing() {
                        debug!(
                            external_id = event.external_id.as_deref().unwrap_or_default(),
                            "creation event deduplicated"
                        );
                        self.metrics.increment_idempotent_hits();
                    } else {
                        self.metrics.increment_created();
                    }
                    if let Err(e) = delivery.ack().await {
                        warn!(error = %e, "failed to ack creation event");
                    }
                }
                Err(IngestError::Validation(e)) => {
                    warn!(error = %e, user_id = %event.user_id, "dropping invalid creation event");
                    self.metrics.increment_ingest_failures();
                    if let Err(e) = delivery.ack().await {
                        warn!(error = %e, "failed to ack invalid event");
                    }
                }
                Err(IngestError::State(e)) => {
                    warn!(error = %e, user_id = %event.user_id, "store rejected creation event, requeueing");
                    self.metrics.increment_ingest_failures();
                    if let Err(e) = delivery.reject(true).await {
                        warn!(error = %e, "failed to requeue creation event");
                    }
                }
            }
        }

        info!(queue = %self.queue, "ingest worker stream ended");
        Ok(())
    }
}
