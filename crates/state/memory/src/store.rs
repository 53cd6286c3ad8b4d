use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use remind_core::{
    DeviceToken, DeviceTokenRegistration, Platform, Reminder, ReminderFilter, ReminderStatus,
};
use remind_state::error::StateError;
use remind_state::store::{
    CreateOutcome, ReminderStats, ReminderStore, TemplateAdvance,
};

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Default)]
struct Inner {
    reminders: HashMap<Uuid, Reminder>,
    tokens: Vec<DeviceToken>,
}

/// In-memory [`ReminderStore`] backed by a [`RwLock`]-guarded map.
///
/// The write lock makes every mutation atomic, which gives
/// `advance_template` the same all-or-nothing behavior the Postgres
/// backend gets from a transaction.
#[derive(Debug, Default)]
pub struct MemoryReminderStore {
    inner: RwLock<Inner>,
}

impl MemoryReminderStore {
    /// Create a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn matches_filter(reminder: &Reminder, filter: &ReminderFilter) -> bool {
    if let Some(ref user_id) = filter.user_id
        && reminder.user_id != *user_id
    {
        return false;
    }
    if let Some(status) = filter.status
        && reminder.status != status
    {
        return false;
    }
    if let Some(is_recurring) = filter.is_recurring
        && reminder.is_recurring != is_recurring
    {
        return false;
    }
    if let Some(is_active) = filter.is_active
        && reminder.is_active != is_active
    {
        return false;
    }
    if let Some(start) = filter.start
        && reminder.reminder_time < start
    {
        return false;
    }
    if let Some(end) = filter.end
        && reminder.reminder_time > end
    {
        return false;
    }
    true
}

#[async_trait]
impl ReminderStore for MemoryReminderStore {
    async fn create_reminder(&self, mut reminder: Reminder) -> Result<CreateOutcome, StateError> {
        let mut inner = self.write();

        if let Some(ref external_id) = reminder.external_id
            && let Some(existing) = inner
                .reminders
                .values()
                .find(|r| r.external_id.as_deref() == Some(external_id.as_str()))
        {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }

        if reminder.external_id.is_none() {
            reminder.external_id = Some(reminder.id.to_string());
        }

        inner.reminders.insert(reminder.id, reminder.clone());
        Ok(CreateOutcome::Created(reminder))
    }

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StateError> {
        Ok(self.read().reminders.get(&id).cloned())
    }

    async fn list_reminders(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>, StateError> {
        let inner = self.read();
        let mut rows: Vec<Reminder> = inner
            .reminders
            .values()
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.reminder_time.cmp(&a.reminder_time));
        rows.truncate(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));
        Ok(rows)
    }

    async fn update_reminder(&self, reminder: &Reminder) -> Result<Reminder, StateError> {
        let mut inner = self.write();
        if !inner.reminders.contains_key(&reminder.id) {
            return Err(StateError::NotFound(reminder.id.to_string()));
        }
        inner.reminders.insert(reminder.id, reminder.clone());
        Ok(reminder.clone())
    }

    async fn delete_reminder(&self, id: Uuid) -> Result<bool, StateError> {
        Ok(self.write().reminders.remove(&id).is_some())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ReminderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        let mut inner = self.write();
        match inner.reminders.get_mut(&id) {
            Some(reminder) => {
                reminder.status = status;
                reminder.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError> {
        let inner = self.read();
        let mut due: Vec<Reminder> = inner
            .reminders
            .values()
            .filter(|r| {
                r.status == ReminderStatus::Pending && !r.is_recurring && r.reminder_time <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| r.reminder_time);
        due.truncate(limit);
        Ok(due)
    }

    async fn get_due_recurring(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError> {
        let inner = self.read();
        let mut due: Vec<Reminder> = inner
            .reminders
            .values()
            .filter(|r| {
                r.is_recurring
                    && r.is_active
                    && r.next_occurrence.is_some_and(|next| next <= now)
                    && r.end_date.is_none_or(|end| end > now)
                    && (r.max_occurrences.is_none_or(|max| r.occurrence_count < max))
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_occurrence);
        due.truncate(limit);
        Ok(due)
    }

    async fn advance_template(&self, advance: TemplateAdvance) -> Result<Reminder, StateError> {
        let mut inner = self.write();

        let template = inner
            .reminders
            .get_mut(&advance.template_id)
            .ok_or_else(|| StateError::NotFound(advance.template_id.to_string()))?;

        template.last_occurrence = Some(advance.last_occurrence);
        template.occurrence_count = advance.occurrence_count;
        template.next_occurrence = advance.next_occurrence;
        template.updated_at = advance.now;
        if advance.deactivate {
            template.is_active = false;
            template.status = ReminderStatus::Processed;
            template.next_occurrence = None;
        }

        let occurrence = advance.occurrence;
        inner.reminders.insert(occurrence.id, occurrence.clone());
        Ok(occurrence)
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError> {
        let inner = self.read();
        let mut expired: Vec<Reminder> = inner
            .reminders
            .values()
            .filter(|r| {
                r.is_active
                    && (r.end_date.is_some_and(|end| end <= now)
                        || r.max_occurrences
                            .is_some_and(|max| r.occurrence_count >= max))
            })
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.reminder_time);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn deactivate(
        &self,
        id: Uuid,
        as_processed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        let mut inner = self.write();
        match inner.reminders.get_mut(&id) {
            Some(reminder) => {
                reminder.is_active = false;
                if as_processed {
                    reminder.status = ReminderStatus::Processed;
                    reminder.next_occurrence = None;
                }
                reminder.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reminder_stats(&self, user_id: Option<&str>) -> Result<ReminderStats, StateError> {
        let inner = self.read();
        let rows = inner
            .reminders
            .values()
            .filter(|r| user_id.is_none_or(|u| r.user_id == u));

        let mut stats = ReminderStats::default();
        for r in rows {
            stats.total_reminders += 1;
            if r.is_recurring {
                stats.recurring_reminders += 1;
                if r.is_active {
                    stats.active_recurring += 1;
                }
            } else {
                stats.one_time_reminders += 1;
            }
            match r.status {
                ReminderStatus::Pending => stats.pending_reminders += 1,
                ReminderStatus::Processed => stats.processed_reminders += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn upsert_device_token(
        &self,
        registration: DeviceTokenRegistration,
        now: DateTime<Utc>,
    ) -> Result<DeviceToken, StateError> {
        let mut inner = self.write();

        let existing = inner
            .tokens
            .iter_mut()
            .filter(|t| {
                t.user_id == registration.user_id && t.platform == registration.platform
            })
            .max_by_key(|t| t.created_at);

        if let Some(token) = existing {
            token.fcm_token = registration.fcm_token;
            token.updated_at = now;
            return Ok(token.clone());
        }

        let token = DeviceToken {
            id: Uuid::new_v4(),
            user_id: registration.user_id,
            platform: registration.platform,
            fcm_token: registration.fcm_token,
            created_at: now,
            updated_at: now,
        };
        inner.tokens.push(token.clone());
        Ok(token)
    }

    async fn latest_token(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<DeviceToken>, StateError> {
        let inner = self.read();
        Ok(inner
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.platform == platform)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn list_device_tokens(
        &self,
        user_id: Option<&str>,
        platform: Option<Platform>,
        limit: usize,
    ) -> Result<Vec<DeviceToken>, StateError> {
        let inner = self.read();
        let mut tokens: Vec<DeviceToken> = inner
            .tokens
            .iter()
            .filter(|t| {
                user_id.is_none_or(|u| t.user_id == u)
                    && platform.is_none_or(|p| t.platform == p)
            })
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tokens.truncate(limit);
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_conformance() {
        let store = MemoryReminderStore::new();
        remind_state::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let store = MemoryReminderStore::new();
        for i in 0..5 {
            let input = remind_core::CreateReminder {
                user_id: "u".into(),
                reminder_type: "ping".into(),
                title: None,
                message: None,
                payload: serde_json::Map::new(),
                reminder_time: Some(
                    format!("2025-01-0{}T00:00:00Z", i + 1).parse().unwrap(),
                ),
                external_id: Some(format!("lim-{i}")),
                recurrence_pattern: None,
                start_date: None,
                end_date: None,
                max_occurrences: None,
                timezone: None,
            };
            let reminder =
                Reminder::one_time(&input, Utc::now(), chrono::Duration::seconds(60)).unwrap();
            store.create_reminder(reminder).await.unwrap();
        }

        let rows = store
            .list_reminders(&ReminderFilter {
                limit: Some(3),
                ..ReminderFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
    }
}
