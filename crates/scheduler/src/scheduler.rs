use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use remind_bus::MessageBus;
use remind_core::{DispatchEvent, RecurrencePattern};
use remind_state::{
    ReminderStore, StateError, SuppressionSource, TemplateAdvance, UserProfileSource,
};

use crate::metrics::ReminderMetrics;
use crate::suppression::should_suppress;

/// Tunables for the periodic scans.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cadence of the expansion and dispatch scans.
    pub scan_interval: Duration,
    /// Cadence of the expiration cleanup.
    pub cleanup_interval: Duration,
    /// Max rows processed per scan per tick.
    pub batch_size: usize,
    /// Routing key for dispatch events.
    pub output_routing_key: String,
    /// Fallback timezone for local-date computations.
    pub default_timezone: chrono_tz::Tz,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(3600),
            batch_size: 100,
            output_routing_key: "reminders.dispatch".into(),
            default_timezone: chrono_tz::Tz::UTC,
        }
    }
}

/// Drives the reminder lifecycle with bounded batches per tick.
///
/// The per-tick methods take `now` as a parameter so tests can advance
/// virtual time; [`run`](Self::run) feeds them the wall clock.
pub struct Scheduler {
    store: Arc<dyn ReminderStore>,
    bus: Arc<dyn MessageBus>,
    suppression: Arc<dyn SuppressionSource>,
    profiles: Arc<dyn UserProfileSource>,
    metrics: Arc<ReminderMetrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn ReminderStore>,
        bus: Arc<dyn MessageBus>,
        suppression: Arc<dyn SuppressionSource>,
        profiles: Arc<dyn UserProfileSource>,
        metrics: Arc<ReminderMetrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            suppression,
            profiles,
            metrics,
            config,
        }
    }

    /// Run the scan and cleanup intervals until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut scan = tokio::time::interval(self.config.scan_interval);
        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);
        // The first cleanup tick completes immediately; skip it so startup
        // does not race migrations elsewhere in the process.
        cleanup.tick().await;

        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            cleanup_interval_secs = self.config.cleanup_interval.as_secs(),
            batch_size = self.config.batch_size,
            "scheduler running"
        );

        loop {
            tokio::select! {
                _ = scan.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.generate_recurring(now).await {
                        warn!(error = %e, "expansion scan failed");
                    }
                    if let Err(e) = self.scan_and_dispatch(now).await {
                        warn!(error = %e, "dispatch scan failed");
                    }
                }
                _ = cleanup.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.cleanup_expired(now).await {
                        warn!(error = %e, "expiration cleanup failed");
                    }
                }
            }
        }
    }

    /// Expansion scan: materialize one occurrence from each due template.
    ///
    /// Returns the number of occurrences generated. Per-template failures
    /// are logged and skipped; the scan itself only fails when the due
    /// query does.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the due-template query fails.
    pub async fn generate_recurring(&self, now: DateTime<Utc>) -> Result<u32, StateError> {
        let templates = self
            .store
            .get_due_recurring(now, self.config.batch_size)
            .await?;
        self.metrics.increment_scheduler_scans();

        let mut generated = 0u32;
        for template in templates {
            let Some(pattern) = template.recurrence_pattern.clone() else {
                warn!(template_id = %template.id, "recurring row has no pattern, retiring it");
                self.store.deactivate(template.id, true, now).await?;
                continue;
            };
            let Some(consumed) = template.next_occurrence else {
                continue;
            };

            let next = pattern.next_after(consumed, now);

            // A cron expression with no computable next fire is left alone:
            // the template stays active with its occurrence unconsumed and
            // is retried on a later scan.
            if next.is_none() && matches!(pattern, RecurrencePattern::Custom { .. }) {
                debug!(template_id = %template.id, "cron produced no next occurrence");
                continue;
            }

            let occurrence_count = template.occurrence_count + 1;
            let max_reached = template
                .max_occurrences
                .is_some_and(|max| occurrence_count >= max);
            let passes_end = match (next, template.end_date) {
                (Some(next), Some(end)) => next >= end,
                _ => false,
            };
            let deactivate = max_reached || next.is_none() || passes_end;

            let advance = TemplateAdvance {
                template_id: template.id,
                occurrence: template.spawn_occurrence(now),
                last_occurrence: consumed,
                next_occurrence: if deactivate { None } else { next },
                occurrence_count,
                deactivate,
                now,
            };

            match self.store.advance_template(advance).await {
                Ok(occurrence) => {
                    generated += 1;
                    self.metrics.increment_occurrences_generated();
                    debug!(
                        template_id = %template.id,
                        occurrence_id = %occurrence.id,
                        occurrence_number = occurrence_count,
                        deactivated = deactivate,
                        "generated occurrence"
                    );
                }
                Err(e) => {
                    warn!(template_id = %template.id, error = %e, "failed to advance template");
                }
            }
        }

        if generated > 0 {
            info!(generated, "expansion scan complete");
        }
        Ok(generated)
    }

    /// Dispatch scan: publish due pending occurrences to the output queue.
    ///
    /// Returns the number of events published.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the due query or a status update fails.
    pub async fn scan_and_dispatch(&self, now: DateTime<Utc>) -> Result<u32, StateError> {
        let due = self
            .store
            .get_due_reminders(now, self.config.batch_size)
            .await?;
        self.metrics.increment_scheduler_scans();

        let mut dispatched = 0u32;
        for reminder in due {
            if should_suppress(
                &reminder,
                self.suppression.as_ref(),
                self.profiles.as_ref(),
                self.config.default_timezone,
            )
            .await
            {
                info!(
                    reminder_id = %reminder.id,
                    user_id = %reminder.user_id,
                    "suppressing reminder, already satisfied"
                );
                self.store.mark_skipped(reminder.id, now).await?;
                self.metrics.increment_suppressed();
                continue;
            }

            let event = DispatchEvent {
                user_id: reminder.user_id.clone(),
                reminder_id: reminder.id,
                reminder_type: reminder.reminder_type.clone(),
                payload: reminder.dispatch_payload(),
                timestamp: reminder.reminder_time,
            };
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(reminder_id = %reminder.id, error = %e, "dispatch event serialization failed");
                    self.store.mark_failed(reminder.id, now).await?;
                    self.metrics.increment_publish_failures();
                    continue;
                }
            };

            match self
                .bus
                .publish(&self.config.output_routing_key, &payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_queued(reminder.id, now).await?;
                    dispatched += 1;
                    self.metrics.increment_scheduler_dispatched();
                }
                Err(e) => {
                    // No retry within the same tick; the row is marked and
                    // the reason stays in the logs.
                    warn!(reminder_id = %reminder.id, error = %e, reason = "publish_failed", "dispatch publish failed");
                    self.store.mark_failed(reminder.id, now).await?;
                    self.metrics.increment_publish_failures();
                }
            }
        }

        if dispatched > 0 {
            info!(dispatched, "dispatch scan complete");
        }
        Ok(dispatched)
    }

    /// Expiration cleanup: deactivate rows past their `end_date` or
    /// occurrence budget. Templates also transition to `Processed` with
    /// `next_occurrence` cleared.
    ///
    /// Returns the number of rows deactivated.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the expired query fails.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u32, StateError> {
        let expired = self.store.find_expired(now, self.config.batch_size).await?;

        let mut cleaned = 0u32;
        for reminder in expired {
            match self
                .store
                .deactivate(reminder.id, reminder.is_recurring, now)
                .await
            {
                Ok(true) => {
                    cleaned += 1;
                    self.metrics.increment_expired_cleaned();
                    debug!(
                        reminder_id = %reminder.id,
                        is_recurring = reminder.is_recurring,
                        "deactivated expired reminder"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(reminder_id = %reminder.id, error = %e, "failed to deactivate expired reminder");
                }
            }
        }

        if cleaned > 0 {
            info!(cleaned, "expiration cleanup complete");
        }
        Ok(cleaned)
    }
}
