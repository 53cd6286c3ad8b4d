use tracing::{debug, warn};

use remind_core::Reminder;
use remind_state::{SuppressionSource, UserProfileSource};

use crate::timezone::resolve_timezone;

/// Reminder type subject to nutrition suppression.
pub const NUTRITION_LOG_TYPE: &str = "nutrition_log";

/// Decide whether a due reminder should be suppressed instead of
/// dispatched.
///
/// Only `nutrition_log` reminders are candidates: the reminder's firing
/// instant is converted to the user's local date, and the reminder is
/// suppressed when a matching meal is already logged for that day. Any
/// error in the lookup fails open.
pub async fn should_suppress(
    reminder: &Reminder,
    suppression: &dyn SuppressionSource,
    profiles: &dyn UserProfileSource,
    default_timezone: chrono_tz::Tz,
) -> bool {
    if reminder.reminder_type != NUTRITION_LOG_TYPE {
        return false;
    }
    let Some(meal) = reminder.meal_key() else {
        return false;
    };

    let tz = resolve_timezone(reminder, profiles, default_timezone).await;
    let local_date = reminder.reminder_time.with_timezone(&tz).date_naive();

    match suppression
        .was_meal_logged(&reminder.user_id, local_date, &meal)
        .await
    {
        Ok(logged) => {
            debug!(
                user_id = %reminder.user_id,
                meal = %meal,
                timezone = %tz,
                %local_date,
                logged,
                "nutrition suppression check"
            );
            logged
        }
        Err(e) => {
            warn!(
                user_id = %reminder.user_id,
                error = %e,
                "suppression check failed, failing open"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use serde_json::{Map, Value};

    use remind_core::CreateReminder;
    use remind_state_memory::{MemorySuppressionSource, MemoryUserProfileSource};

    use super::*;

    fn nutrition_reminder(meal: &str, timezone: Option<&str>) -> Reminder {
        let mut payload = Map::new();
        payload.insert("meal".into(), Value::String(meal.into()));
        let input = CreateReminder {
            user_id: "7".into(),
            reminder_type: NUTRITION_LOG_TYPE.into(),
            title: None,
            message: None,
            payload,
            reminder_time: Some("2025-04-01T07:30:00Z".parse::<DateTime<Utc>>().unwrap()),
            external_id: Some("sup-test".into()),
            recurrence_pattern: None,
            start_date: None,
            end_date: None,
            max_occurrences: None,
            timezone: timezone.map(str::to_owned),
        };
        Reminder::one_time(&input, Utc::now(), Duration::seconds(60)).unwrap()
    }

    #[tokio::test]
    async fn suppressed_when_meal_logged_on_local_day() {
        let suppression = MemorySuppressionSource::new();
        let profiles = MemoryUserProfileSource::new();
        // 07:30 UTC is 13:00 in Asia/Kolkata, still 2025-04-01 locally.
        suppression.log_meal("7", NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), "lunch");

        let reminder = nutrition_reminder("lunch", Some("Asia/Kolkata"));
        assert!(
            should_suppress(&reminder, &suppression, &profiles, chrono_tz::Tz::UTC).await
        );
    }

    #[tokio::test]
    async fn not_suppressed_without_a_log() {
        let suppression = MemorySuppressionSource::new();
        let profiles = MemoryUserProfileSource::new();
        let reminder = nutrition_reminder("lunch", Some("Asia/Kolkata"));
        assert!(
            !should_suppress(&reminder, &suppression, &profiles, chrono_tz::Tz::UTC).await
        );
    }

    #[tokio::test]
    async fn timezone_shifts_the_local_date() {
        let suppression = MemorySuppressionSource::new();
        let profiles = MemoryUserProfileSource::new();
        // 07:30 UTC on Apr 1 is still Mar 31 in Honolulu (UTC-10); a meal
        // logged for Apr 1 must not suppress.
        suppression.log_meal("7", NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), "lunch");

        let reminder = nutrition_reminder("lunch", Some("Pacific/Honolulu"));
        assert!(
            !should_suppress(&reminder, &suppression, &profiles, chrono_tz::Tz::UTC).await
        );

        suppression.log_meal("7", NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(), "lunch");
        assert!(
            should_suppress(&reminder, &suppression, &profiles, chrono_tz::Tz::UTC).await
        );
    }

    #[tokio::test]
    async fn other_reminder_types_are_never_suppressed() {
        let suppression = MemorySuppressionSource::new();
        let profiles = MemoryUserProfileSource::new();
        suppression.log_meal("7", NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), "lunch");

        let mut reminder = nutrition_reminder("lunch", None);
        reminder.reminder_type = "medication".into();
        assert!(
            !should_suppress(&reminder, &suppression, &profiles, chrono_tz::Tz::UTC).await
        );
    }

    #[tokio::test]
    async fn missing_meal_key_skips_the_check() {
        let suppression = MemorySuppressionSource::new();
        let profiles = MemoryUserProfileSource::new();
        let mut reminder = nutrition_reminder("lunch", None);
        reminder.payload.clear();
        assert!(
            !should_suppress(&reminder, &suppression, &profiles, chrono_tz::Tz::UTC).await
        );
    }

    #[tokio::test]
    async fn lookup_errors_fail_open() {
        let suppression = MemorySuppressionSource::new();
        let profiles = MemoryUserProfileSource::new();
        suppression.log_meal("7", NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), "lunch");
        suppression.fail_lookups(true);

        let reminder = nutrition_reminder("lunch", None);
        assert!(
            !should_suppress(&reminder, &suppression, &profiles, chrono_tz::Tz::UTC).await
        );
    }
}
