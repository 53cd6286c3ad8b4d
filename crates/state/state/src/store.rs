use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use remind_core::{
    DeviceToken, DeviceTokenRegistration, Platform, Reminder, ReminderFilter, ReminderStatus,
};

use crate::error::StateError;

/// Result of an idempotent create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new row was inserted.
    Created(Reminder),
    /// A row with the same `external_id` already existed; it is returned
    /// unchanged.
    Existing(Reminder),
}

impl CreateOutcome {
    /// The stored row, whether fresh or pre-existing.
    #[must_use]
    pub fn into_reminder(self) -> Reminder {
        match self {
            Self::Created(r) | Self::Existing(r) => r,
        }
    }

    /// Whether this create hit an existing row.
    #[must_use]
    pub fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

/// The atomic body of one expansion step: insert the generated occurrence
/// and advance (or retire) its template in a single transaction.
#[derive(Debug, Clone)]
pub struct TemplateAdvance {
    pub template_id: Uuid,
    /// The generated occurrence row to insert.
    pub occurrence: Reminder,
    /// New `last_occurrence` for the template (the instant just consumed).
    pub last_occurrence: DateTime<Utc>,
    /// New `next_occurrence`; `None` retires the template.
    pub next_occurrence: Option<DateTime<Utc>>,
    /// New `occurrence_count`.
    pub occurrence_count: i32,
    /// Deactivate the template (`is_active = false`, `status = Processed`,
    /// `next_occurrence = NULL`).
    pub deactivate: bool,
    pub now: DateTime<Utc>,
}

/// Aggregate counts over the reminders table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReminderStats {
    pub total_reminders: u64,
    pub one_time_reminders: u64,
    pub recurring_reminders: u64,
    pub active_recurring: u64,
    pub pending_reminders: u64,
    pub processed_reminders: u64,
}

/// Persistent store for reminders and device tokens.
///
/// Implementations must be `Send + Sync`; all writes are transactional and
/// idempotent creates return the existing row unchanged on conflict.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Insert a reminder, deduplicating on `external_id`.
    ///
    /// When the row carries no `external_id`, the backend persists the row
    /// id as the external id so queue redeliveries dedupe.
    async fn create_reminder(&self, reminder: Reminder) -> Result<CreateOutcome, StateError>;

    /// Fetch one reminder by id.
    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StateError>;

    /// List reminders matching the filter, newest `reminder_time` first.
    async fn list_reminders(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>, StateError>;

    /// Overwrite a reminder's mutable columns with the given row.
    ///
    /// Returns [`StateError::NotFound`] if the row does not exist.
    async fn update_reminder(&self, reminder: &Reminder) -> Result<Reminder, StateError>;

    /// Hard-delete a reminder. Returns `true` if the row existed.
    async fn delete_reminder(&self, id: Uuid) -> Result<bool, StateError>;

    /// Single-row status update with `updated_at = now`. Returns `true`
    /// if a row was affected.
    async fn set_status(
        &self,
        id: Uuid,
        status: ReminderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError>;

    /// Pending, non-recurring rows with `reminder_time <= now`, ascending.
    async fn get_due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError>;

    /// Active recurring templates whose `next_occurrence <= now` and whose
    /// bounds (`end_date`, `max_occurrences`) still permit occurrences,
    /// ascending by `next_occurrence`.
    async fn get_due_recurring(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError>;

    /// Atomically insert a generated occurrence and advance its template.
    /// Returns the inserted occurrence.
    async fn advance_template(&self, advance: TemplateAdvance) -> Result<Reminder, StateError>;

    /// Active rows whose `end_date <= now` or whose `occurrence_count` has
    /// reached `max_occurrences`; candidates for expiration cleanup.
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError>;

    /// Deactivate a row. For templates (`as_processed`), also clears
    /// `next_occurrence` and transitions the status to `Processed`.
    /// Returns `true` if a row was affected.
    async fn deactivate(
        &self,
        id: Uuid,
        as_processed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError>;

    /// Aggregate counts, optionally scoped to one user.
    async fn reminder_stats(&self, user_id: Option<&str>) -> Result<ReminderStats, StateError>;

    /// Insert or replace the token for (`user_id`, `platform`).
    async fn upsert_device_token(
        &self,
        registration: DeviceTokenRegistration,
        now: DateTime<Utc>,
    ) -> Result<DeviceToken, StateError>;

    /// The most recently created token for (`user_id`, `platform`).
    async fn latest_token(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<DeviceToken>, StateError>;

    /// List device tokens, newest first.
    async fn list_device_tokens(
        &self,
        user_id: Option<&str>,
        platform: Option<Platform>,
        limit: usize,
    ) -> Result<Vec<DeviceToken>, StateError>;

    /// Mark a reminder queued for delivery so later scans skip it.
    async fn mark_queued(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StateError> {
        self.set_status(id, ReminderStatus::Queued, now).await
    }

    /// Mark a reminder processed.
    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StateError> {
        self.set_status(id, ReminderStatus::Processed, now).await
    }

    /// Mark a reminder failed. The reason is carried in logs, not rows.
    async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StateError> {
        self.set_status(id, ReminderStatus::Failed, now).await
    }

    /// Mark a reminder skipped by a suppression rule.
    async fn mark_skipped(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StateError> {
        self.set_status(id, ReminderStatus::Skipped, now).await
    }

    /// Mark a reminder acknowledged by the client. Idempotent.
    async fn mark_acknowledged(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StateError> {
        self.set_status(id, ReminderStatus::Acknowledged, now).await
    }
}

/// Read-only check against the nutrition log: has the user already logged
/// this meal on the given local day?
///
/// The production implementation queries the domain table; tests substitute
/// an in-memory fake. Callers treat errors as "not logged" (fail-open).
#[async_trait]
pub trait SuppressionSource: Send + Sync {
    async fn was_meal_logged(
        &self,
        user_id: &str,
        local_date: NaiveDate,
        meal: &str,
    ) -> Result<bool, StateError>;
}

/// Read-only lookup of a user's profile timezone.
#[async_trait]
pub trait UserProfileSource: Send + Sync {
    async fn timezone_for(&self, user_id: &str) -> Result<Option<String>, StateError>;
}
