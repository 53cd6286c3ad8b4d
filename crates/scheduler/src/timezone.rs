use tracing::debug;

use remind_core::Reminder;
use remind_state::UserProfileSource;

/// Resolve the effective timezone for a reminder: the reminder's own
/// timezone, else the user profile's, else the service default.
pub async fn resolve_timezone(
    reminder: &Reminder,
    profiles: &dyn UserProfileSource,
    default_timezone: chrono_tz::Tz,
) -> chrono_tz::Tz {
    if let Some(name) = reminder.timezone.as_deref() {
        match name.parse() {
            Ok(tz) => return tz,
            Err(_) => debug!(timezone = name, "reminder carries an invalid timezone"),
        }
    }
    resolve_user_timezone(&reminder.user_id, profiles, default_timezone).await
}

/// Resolve a user's timezone from their profile, falling back to the
/// service default. Lookup errors fall back silently; timezone resolution
/// must never block dispatch.
pub async fn resolve_user_timezone(
    user_id: &str,
    profiles: &dyn UserProfileSource,
    default_timezone: chrono_tz::Tz,
) -> chrono_tz::Tz {
    match profiles.timezone_for(user_id).await {
        Ok(Some(name)) => match name.parse() {
            Ok(tz) => tz,
            Err(_) => {
                debug!(user_id, timezone = %name, "profile carries an invalid timezone");
                default_timezone
            }
        },
        Ok(None) => default_timezone,
        Err(e) => {
            debug!(user_id, error = %e, "profile timezone lookup failed");
            default_timezone
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use serde_json::Map;

    use remind_core::CreateReminder;
    use remind_state_memory::MemoryUserProfileSource;

    use super::*;

    fn reminder(timezone: Option<&str>) -> Reminder {
        let input = CreateReminder {
            user_id: "42".into(),
            reminder_type: "nutrition_log".into(),
            title: None,
            message: None,
            payload: Map::new(),
            reminder_time: Some("2025-04-01T07:30:00Z".parse::<DateTime<Utc>>().unwrap()),
            external_id: Some("tz-test".into()),
            recurrence_pattern: None,
            start_date: None,
            end_date: None,
            max_occurrences: None,
            timezone: timezone.map(str::to_owned),
        };
        Reminder::one_time(&input, Utc::now(), Duration::seconds(60)).unwrap()
    }

    #[tokio::test]
    async fn reminder_timezone_wins() {
        let profiles = MemoryUserProfileSource::new();
        profiles.set_timezone("42", "Europe/London");
        let tz = resolve_timezone(
            &reminder(Some("Asia/Kolkata")),
            &profiles,
            chrono_tz::Tz::UTC,
        )
        .await;
        assert_eq!(tz, chrono_tz::Asia::Kolkata);
    }

    #[tokio::test]
    async fn profile_timezone_is_the_fallback() {
        let profiles = MemoryUserProfileSource::new();
        profiles.set_timezone("42", "Europe/London");
        let tz = resolve_timezone(&reminder(None), &profiles, chrono_tz::Tz::UTC).await;
        assert_eq!(tz, chrono_tz::Europe::London);
    }

    #[tokio::test]
    async fn default_applies_when_nothing_resolves() {
        let profiles = MemoryUserProfileSource::new();
        let tz = resolve_timezone(
            &reminder(Some("Not/A/Zone")),
            &profiles,
            chrono_tz::America::New_York,
        )
        .await;
        assert_eq!(tz, chrono_tz::America::New_York);
    }
}
