use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::recurrence::RecurrencePattern;
use crate::reminder::ValidationError;

/// A reminder-creation event.
///
/// This is both the body of `POST /reminders/` and the message published to
/// the input queue; the API enqueues it verbatim and the ingestion worker
/// performs the actual insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateReminder {
    pub user_id: String,
    pub reminder_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: Map<String, Value>,
    /// Firing instant for one-time reminders.
    #[serde(default)]
    pub reminder_time: Option<DateTime<Utc>>,
    /// Idempotency key; synthesized when absent.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Present for recurring reminders.
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
    /// Required when `recurrence_pattern` is set.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_occurrences: Option<i32>,
    /// IANA timezone for local-date computations.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl CreateReminder {
    /// Whether this event creates a recurring template.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.recurrence_pattern.is_some()
    }

    /// Validate the event shape before enqueueing or inserting.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when a recurring event lacks a
    /// `start_date` or carries an invalid pattern, or a one-time event
    /// lacks a `reminder_time`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(ref pattern) = self.recurrence_pattern {
            pattern.validate()?;
            if self.start_date.is_none() {
                return Err(ValidationError::MissingStartDate);
            }
        } else if self.reminder_time.is_none() {
            return Err(ValidationError::MissingReminderTime);
        }
        Ok(())
    }

    /// Deterministic idempotency key for callers that sent none:
    /// `"{user_id}:{reminder_type}:{epoch_seconds}"`, using the reminder
    /// time when present and `now` otherwise.
    #[must_use]
    pub fn synthesized_external_id(&self, now: DateTime<Utc>) -> String {
        let epoch = self.reminder_time.unwrap_or(now).timestamp();
        format!("{}:{}:{}", self.user_id, self.reminder_type, epoch)
    }
}

/// Response returned by the creation endpoint: the row is created
/// asynchronously, only the idempotency key and enqueue time are known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QueuedReminder {
    pub external_id: String,
    pub queued_at: DateTime<Utc>,
}

/// A dispatch event published to the output queue when a reminder comes
/// due. Contains everything the dispatcher needs to send a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DispatchEvent {
    pub user_id: String,
    pub reminder_id: Uuid,
    pub reminder_type: String,
    /// Stored payload with resolved `title`/`message` merged in. May carry
    /// an inline `fcm_token` that bypasses the token lookup.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: Map<String, Value>,
    /// The reminder's firing instant, UTC.
    pub timestamp: DateTime<Utc>,
}

impl DispatchEvent {
    /// Inline token override from the payload, if any.
    #[must_use]
    pub fn inline_token(&self) -> Option<&str> {
        self.payload.get("fcm_token").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn validate_one_time_requires_time() {
        let event = CreateReminder {
            user_id: "u".into(),
            reminder_type: "ping".into(),
            title: None,
            message: None,
            payload: Map::new(),
            reminder_time: None,
            external_id: None,
            recurrence_pattern: None,
            start_date: None,
            end_date: None,
            max_occurrences: None,
            timezone: None,
        };
        assert!(event.validate().is_err());
    }

    #[test]
    fn validate_recurring_requires_start_date() {
        let json = serde_json::json!({
            "user_id": "u",
            "reminder_type": "medication",
            "recurrence_pattern": {"type": "daily", "interval": 1},
        });
        let event: CreateReminder = serde_json::from_value(json).unwrap();
        assert!(event.is_recurring());
        assert!(event.validate().is_err());
    }

    #[test]
    fn synthesized_external_id_uses_reminder_time() {
        let event = CreateReminder {
            user_id: "u7".into(),
            reminder_type: "ping".into(),
            title: None,
            message: None,
            payload: Map::new(),
            reminder_time: Some(utc("2025-01-01T00:00:00Z")),
            external_id: None,
            recurrence_pattern: None,
            start_date: None,
            end_date: None,
            max_occurrences: None,
            timezone: None,
        };
        assert_eq!(
            event.synthesized_external_id(utc("2025-06-01T00:00:00Z")),
            "u7:ping:1735689600"
        );
    }

    #[test]
    fn create_event_minimal_json() {
        let json = r#"{
            "user_id": "u1",
            "reminder_type": "nutrition_log",
            "reminder_time": "2025-04-01T07:30:00Z"
        }"#;
        let event: CreateReminder = serde_json::from_str(json).unwrap();
        assert!(event.payload.is_empty());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn dispatch_event_wire_shape() {
        let event = DispatchEvent {
            user_id: "u1".into(),
            reminder_id: Uuid::nil(),
            reminder_type: "ping".into(),
            payload: serde_json::json!({"fcm_token": "tok"})
                .as_object()
                .cloned()
                .unwrap(),
            timestamp: utc("2025-01-01T00:00:00Z"),
        };
        assert_eq!(event.inline_token(), Some("tok"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["timestamp"], "2025-01-01T00:00:00Z");
        let back: DispatchEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.timestamp, event.timestamp);
    }
}
