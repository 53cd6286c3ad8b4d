use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::event::CreateReminder;
use crate::recurrence::{RecurrenceError, RecurrencePattern};

/// Lifecycle state of a reminder row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ReminderStatus {
    /// Created, waiting to become due.
    Pending,
    /// Picked up by the dispatch scan and published to the output queue.
    Queued,
    /// Delivered (or terminal for an exhausted template).
    Processed,
    /// Acknowledged by the client.
    Acknowledged,
    /// Suppressed by a business rule before dispatch.
    Skipped,
    /// Publish or delivery failed.
    Failed,
}

impl ReminderStatus {
    /// String form as stored in the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Queued => "Queued",
            Self::Processed => "Processed",
            Self::Acknowledged => "Acknowledged",
            Self::Skipped => "Skipped",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Queued" => Ok(Self::Queued),
            "Processed" => Ok(Self::Processed),
            "Acknowledged" => Ok(Self::Acknowledged),
            "Skipped" => Ok(Self::Skipped),
            "Failed" => Ok(Self::Failed),
            other => Err(ValidationError::UnknownStatus(other.to_owned())),
        }
    }
}

/// Mobile platform a device token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    /// String form as stored in the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Web => "web",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            "web" => Ok(Self::Web),
            other => Err(ValidationError::UnknownPlatform(other.to_owned())),
        }
    }
}

/// A reminder row. One table holds three shapes:
///
/// - one-time: `is_recurring == false`, `is_generated == false`;
/// - recurring template: `is_recurring == true`, `is_generated == false`,
///   spawns occurrences and is never dispatched itself;
/// - generated occurrence: `is_recurring == false`, `is_generated == true`,
///   with `parent_reminder_id` pointing at its template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Reminder {
    pub id: Uuid,
    pub user_id: String,
    pub reminder_type: String,
    pub title: Option<String>,
    pub message: Option<String>,
    /// Opaque JSON map carried through to the push payload.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: Map<String, Value>,
    /// UTC instant of the next intended firing. Mirrors `next_occurrence`
    /// for templates.
    pub reminder_time: DateTime<Utc>,
    pub status: ReminderStatus,
    /// Caller-supplied idempotency key; backfilled with the row id when the
    /// caller sent none.
    pub external_id: Option<String>,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub is_recurring: bool,
    pub parent_reminder_id: Option<Uuid>,
    /// 1-based sequence number within the template (occurrences only).
    pub occurrence_number: Option<i32>,
    pub is_generated: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub max_occurrences: Option<i32>,
    /// IANA timezone for local-date computations (suppression).
    pub timezone: Option<String>,
    pub last_occurrence: Option<DateTime<Utc>>,
    pub next_occurrence: Option<DateTime<Utc>>,
    pub occurrence_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// Build a one-time reminder from a creation event.
    ///
    /// One-time rows are bounded with `max_occurrences = 1` and an
    /// `end_date` slightly past the firing time so the expiration cleanup
    /// retires rows that missed their window.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingReminderTime`] when the event
    /// carries no `reminder_time`.
    pub fn one_time(
        input: &CreateReminder,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Self, ValidationError> {
        let reminder_time = input
            .reminder_time
            .ok_or(ValidationError::MissingReminderTime)?;

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: input.user_id.clone(),
            reminder_type: input.reminder_type.clone(),
            title: input.title.clone(),
            message: input.message.clone(),
            payload: merged_payload(&input.payload, input.title.as_deref(), input.message.as_deref()),
            reminder_time,
            status: ReminderStatus::Pending,
            external_id: input.external_id.clone(),
            recurrence_pattern: None,
            is_recurring: false,
            parent_reminder_id: None,
            occurrence_number: None,
            is_generated: false,
            start_date: None,
            end_date: Some(reminder_time + grace),
            max_occurrences: Some(1),
            timezone: input.timezone.clone(),
            last_occurrence: None,
            next_occurrence: None,
            occurrence_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build a recurring template from a creation event.
    ///
    /// Validates the pattern and seeds `next_occurrence` with the first
    /// computed fire (the start date itself).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingStartDate`] when the event carries
    /// no `start_date`, or the pattern's own validation error.
    pub fn template(input: &CreateReminder, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let pattern = input
            .recurrence_pattern
            .clone()
            .ok_or(ValidationError::MissingRecurrencePattern)?;
        pattern.validate()?;
        let start_date = input.start_date.ok_or(ValidationError::MissingStartDate)?;
        let first = pattern.first_occurrence(start_date);

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: input.user_id.clone(),
            reminder_type: input.reminder_type.clone(),
            title: input.title.clone(),
            message: input.message.clone(),
            payload: merged_payload(&input.payload, input.title.as_deref(), input.message.as_deref()),
            reminder_time: first,
            status: ReminderStatus::Pending,
            external_id: input.external_id.clone(),
            recurrence_pattern: Some(pattern),
            is_recurring: true,
            parent_reminder_id: None,
            occurrence_number: None,
            is_generated: false,
            start_date: Some(start_date),
            end_date: input.end_date,
            max_occurrences: input.max_occurrences,
            timezone: input.timezone.clone(),
            last_occurrence: None,
            next_occurrence: Some(first),
            occurrence_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Materialize the next occurrence row from this template.
    ///
    /// The child fires at the template's current `next_occurrence`, carries
    /// the derived external id `"{parent_external_id}_{occurrence_number}"`,
    /// and is itself non-recurring.
    #[must_use]
    pub fn spawn_occurrence(&self, now: DateTime<Utc>) -> Self {
        let number = self.occurrence_count + 1;
        Self {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            reminder_type: self.reminder_type.clone(),
            title: self.title.clone(),
            message: self.message.clone(),
            payload: self.payload.clone(),
            reminder_time: self.next_occurrence.unwrap_or(self.reminder_time),
            status: ReminderStatus::Pending,
            external_id: self
                .external_id
                .as_ref()
                .map(|parent| format!("{parent}_{number}")),
            recurrence_pattern: None,
            is_recurring: false,
            parent_reminder_id: Some(self.id),
            occurrence_number: Some(number),
            is_generated: true,
            start_date: None,
            end_date: None,
            max_occurrences: None,
            timezone: self.timezone.clone(),
            last_occurrence: None,
            next_occurrence: None,
            occurrence_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this row is a recurring template (never dispatched directly).
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.is_recurring && !self.is_generated
    }

    /// Payload for the dispatch event: the stored payload with `title` and
    /// `message` merged in only when non-null, so pre-populated payload
    /// values are never clobbered.
    #[must_use]
    pub fn dispatch_payload(&self) -> Map<String, Value> {
        let mut payload = self.payload.clone();
        if let Some(ref title) = self.title {
            payload.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(ref message) = self.message {
            payload.insert("message".into(), Value::String(message.clone()));
        }
        payload
    }

    /// The meal key used by nutrition suppression: `payload.meal`, falling
    /// back to `payload.context.key`, lowercased and trimmed.
    #[must_use]
    pub fn meal_key(&self) -> Option<String> {
        let raw = self
            .payload
            .get("meal")
            .and_then(Value::as_str)
            .or_else(|| {
                self.payload
                    .get("context")
                    .and_then(|c| c.get("key"))
                    .and_then(Value::as_str)
            })?;
        let key = raw.trim().to_lowercase();
        if key.is_empty() { None } else { Some(key) }
    }
}

fn merged_payload(
    payload: &Map<String, Value>,
    title: Option<&str>,
    message: Option<&str>,
) -> Map<String, Value> {
    let mut merged = payload.clone();
    if let Some(title) = title {
        merged.insert("title".into(), Value::String(title.to_owned()));
    }
    if let Some(message) = message {
        merged.insert("message".into(), Value::String(message.to_owned()));
    }
    merged
}

/// Partial update applied through the PATCH endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReminderPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub payload: Option<Map<String, Value>>,
    #[serde(default)]
    pub reminder_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<ReminderStatus>,
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ReminderPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.message.is_none()
            && self.payload.is_none()
            && self.reminder_time.is_none()
            && self.status.is_none()
            && self.recurrence_pattern.is_none()
            && self.end_date.is_none()
            && self.timezone.is_none()
            && self.is_active.is_none()
    }
}

/// Filter for listing reminders.
#[derive(Debug, Clone, Default)]
pub struct ReminderFilter {
    pub user_id: Option<String>,
    pub status: Option<ReminderStatus>,
    pub is_recurring: Option<bool>,
    pub is_active: Option<bool>,
    /// Inclusive lower bound on `reminder_time`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `reminder_time`.
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// A registered push token for a (user, platform) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: String,
    pub platform: Platform,
    pub fcm_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration request for a device token. Upserts on (user, platform).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DeviceTokenRegistration {
    pub user_id: String,
    pub platform: Platform,
    pub fcm_token: String,
}

/// Errors from reminder validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// One-time creation without a `reminder_time`.
    #[error("reminder_time is required for one-time reminders")]
    MissingReminderTime,
    /// Recurring creation without a `start_date`.
    #[error("start_date is required for recurring reminders")]
    MissingStartDate,
    /// Template construction without a pattern.
    #[error("recurrence_pattern is required for recurring reminders")]
    MissingRecurrencePattern,
    /// The recurrence pattern itself was invalid.
    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),
    /// An unrecognized status string.
    #[error("unknown reminder status: {0}")]
    UnknownStatus(String),
    /// An unrecognized platform string.
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CreateReminder;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn create_input() -> CreateReminder {
        CreateReminder {
            user_id: "u1".into(),
            reminder_type: "ping".into(),
            title: Some("Hello".into()),
            message: None,
            payload: Map::new(),
            reminder_time: Some(utc("2025-01-01T00:00:00Z")),
            external_id: Some("e1".into()),
            recurrence_pattern: None,
            start_date: None,
            end_date: None,
            max_occurrences: None,
            timezone: None,
        }
    }

    #[test]
    fn one_time_shape() {
        let now = utc("2024-12-31T00:00:00Z");
        let r = Reminder::one_time(&create_input(), now, Duration::seconds(60)).unwrap();
        assert!(!r.is_recurring);
        assert!(!r.is_generated);
        assert_eq!(r.max_occurrences, Some(1));
        assert_eq!(r.end_date, Some(utc("2025-01-01T00:01:00Z")));
        assert_eq!(r.status, ReminderStatus::Pending);
        assert_eq!(r.payload.get("title").unwrap(), "Hello");
        assert!(!r.is_template());
    }

    #[test]
    fn one_time_requires_reminder_time() {
        let mut input = create_input();
        input.reminder_time = None;
        let err = Reminder::one_time(&input, Utc::now(), Duration::seconds(60)).unwrap_err();
        assert!(matches!(err, ValidationError::MissingReminderTime));
    }

    #[test]
    fn template_seeds_next_occurrence_with_start() {
        let mut input = create_input();
        input.recurrence_pattern = Some(RecurrencePattern::Daily {
            interval: 1,
            end_date: None,
            max_occurrences: None,
        });
        input.start_date = Some(utc("2025-02-10T09:00:00Z"));
        input.max_occurrences = Some(3);

        let t = Reminder::template(&input, Utc::now()).unwrap();
        assert!(t.is_template());
        assert_eq!(t.next_occurrence, Some(utc("2025-02-10T09:00:00Z")));
        assert_eq!(t.reminder_time, utc("2025-02-10T09:00:00Z"));
        assert_eq!(t.occurrence_count, 0);
        assert!(t.is_active);
    }

    #[test]
    fn template_requires_start_date() {
        let mut input = create_input();
        input.recurrence_pattern = Some(RecurrencePattern::Daily {
            interval: 1,
            end_date: None,
            max_occurrences: None,
        });
        let err = Reminder::template(&input, Utc::now()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingStartDate));
    }

    #[test]
    fn template_rejects_invalid_pattern() {
        let mut input = create_input();
        input.recurrence_pattern = Some(RecurrencePattern::Weekly {
            interval: 1,
            weekdays: std::collections::BTreeSet::new(),
            end_date: None,
            max_occurrences: None,
        });
        input.start_date = Some(utc("2025-02-10T09:00:00Z"));
        let err = Reminder::template(&input, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Recurrence(RecurrenceError::EmptyWeekdays)
        ));
    }

    #[test]
    fn spawn_occurrence_derives_child_fields() {
        let mut input = create_input();
        input.recurrence_pattern = Some(RecurrencePattern::Daily {
            interval: 1,
            end_date: None,
            max_occurrences: None,
        });
        input.start_date = Some(utc("2025-02-10T09:00:00Z"));
        let template = Reminder::template(&input, Utc::now()).unwrap();

        let child = template.spawn_occurrence(Utc::now());
        assert!(child.is_generated);
        assert!(!child.is_recurring);
        assert_eq!(child.parent_reminder_id, Some(template.id));
        assert_eq!(child.occurrence_number, Some(1));
        assert_eq!(child.external_id.as_deref(), Some("e1_1"));
        assert_eq!(child.reminder_time, utc("2025-02-10T09:00:00Z"));
        assert_eq!(child.status, ReminderStatus::Pending);
    }

    #[test]
    fn dispatch_payload_merges_without_clobbering() {
        let now = Utc::now();
        let mut input = create_input();
        input
            .payload
            .insert("message".into(), Value::String("preset".into()));
        input.message = None;
        let r = Reminder::one_time(&input, now, Duration::seconds(60)).unwrap();

        let payload = r.dispatch_payload();
        // title comes from the column, message keeps the preset value.
        assert_eq!(payload.get("title").unwrap(), "Hello");
        assert_eq!(payload.get("message").unwrap(), "preset");
    }

    #[test]
    fn meal_key_prefers_explicit_meal() {
        let now = Utc::now();
        let mut input = create_input();
        input
            .payload
            .insert("meal".into(), Value::String(" Lunch ".into()));
        input.payload.insert(
            "context".into(),
            serde_json::json!({"key": "breakfast"}),
        );
        let r = Reminder::one_time(&input, now, Duration::seconds(60)).unwrap();
        assert_eq!(r.meal_key().as_deref(), Some("lunch"));
    }

    #[test]
    fn meal_key_falls_back_to_context() {
        let now = Utc::now();
        let mut input = create_input();
        input.payload.insert(
            "context".into(),
            serde_json::json!({"key": "breakfast"}),
        );
        let r = Reminder::one_time(&input, now, Duration::seconds(60)).unwrap();
        assert_eq!(r.meal_key().as_deref(), Some("breakfast"));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            ReminderStatus::Pending,
            ReminderStatus::Queued,
            ReminderStatus::Processed,
            ReminderStatus::Acknowledged,
            ReminderStatus::Skipped,
            ReminderStatus::Failed,
        ] {
            let parsed: ReminderStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("Done".parse::<ReminderStatus>().is_err());
    }

    #[test]
    fn platform_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Platform::Ios).unwrap(), r#""ios""#);
        let p: Platform = serde_json::from_str(r#""android""#).unwrap();
        assert_eq!(p, Platform::Android);
    }

    #[test]
    fn empty_patch_detected() {
        assert!(ReminderPatch::default().is_empty());
        let patch = ReminderPatch {
            title: Some("t".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
