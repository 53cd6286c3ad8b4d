//! Conformance test suite for [`ReminderStore`] backends.
//!
//! Call [`run_store_conformance_tests`] from a backend's test module with a
//! fresh store instance. Every backend must pass the full suite.

use chrono::{DateTime, Duration, Utc};
use serde_json::Map;
use uuid::Uuid;

use remind_core::{
    CreateReminder, DeviceTokenRegistration, Platform, RecurrencePattern, Reminder,
    ReminderFilter, ReminderStatus,
};

use crate::error::StateError;
use crate::store::{ReminderStore, TemplateAdvance};

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().expect("test timestamp should parse")
}

fn one_time(user: &str, external_id: Option<&str>, time: &str) -> Reminder {
    let input = CreateReminder {
        user_id: user.into(),
        reminder_type: "ping".into(),
        title: None,
        message: None,
        payload: Map::new(),
        reminder_time: Some(utc(time)),
        external_id: external_id.map(str::to_owned),
        recurrence_pattern: None,
        start_date: None,
        end_date: None,
        max_occurrences: None,
        timezone: None,
    };
    Reminder::one_time(&input, utc("2025-01-01T00:00:00Z"), Duration::seconds(60))
        .expect("one-time construction should succeed")
}

fn template(user: &str, external_id: &str, start: &str, max: Option<i32>) -> Reminder {
    let input = CreateReminder {
        user_id: user.into(),
        reminder_type: "medication".into(),
        title: None,
        message: None,
        payload: Map::new(),
        reminder_time: None,
        external_id: Some(external_id.into()),
        recurrence_pattern: Some(RecurrencePattern::Daily {
            interval: 1,
            end_date: None,
            max_occurrences: max,
        }),
        start_date: Some(utc(start)),
        end_date: None,
        max_occurrences: max,
        timezone: None,
    };
    Reminder::template(&input, utc("2025-01-01T00:00:00Z"))
        .expect("template construction should succeed")
}

/// Run the full store conformance suite.
///
/// # Errors
///
/// Returns an error if any conformance test fails at the store layer;
/// semantic violations panic with a descriptive message.
pub async fn run_store_conformance_tests(store: &dyn ReminderStore) -> Result<(), StateError> {
    test_create_is_idempotent(store).await?;
    test_create_backfills_external_id(store).await?;
    test_get_and_delete(store).await?;
    test_list_filters(store).await?;
    test_set_status(store).await?;
    test_due_reminders_boundary(store).await?;
    test_due_recurring_eligibility(store).await?;
    test_advance_template(store).await?;
    test_advance_template_deactivates(store).await?;
    test_find_expired_boundary(store).await?;
    test_device_token_latest_semantics(store).await?;
    Ok(())
}

async fn test_create_is_idempotent(store: &dyn ReminderStore) -> Result<(), StateError> {
    let first = store
        .create_reminder(one_time("conf-u1", Some("conf-dup"), "2025-01-01T00:00:00Z"))
        .await?;
    assert!(!first.is_existing(), "first create should insert");
    let first = first.into_reminder();

    let second = store
        .create_reminder(one_time("conf-u1", Some("conf-dup"), "2030-12-31T00:00:00Z"))
        .await?;
    assert!(second.is_existing(), "duplicate external_id should hit");
    let second = second.into_reminder();

    assert_eq!(second.id, first.id, "existing row returned unchanged");
    assert_eq!(second.reminder_time, first.reminder_time);
    assert_eq!(second.created_at, first.created_at);
    Ok(())
}

async fn test_create_backfills_external_id(store: &dyn ReminderStore) -> Result<(), StateError> {
    let created = store
        .create_reminder(one_time("conf-u2", None, "2025-01-01T00:00:00Z"))
        .await?
        .into_reminder();
    assert_eq!(
        created.external_id.as_deref(),
        Some(created.id.to_string().as_str()),
        "missing external_id should be backfilled with the row id"
    );
    Ok(())
}

async fn test_get_and_delete(store: &dyn ReminderStore) -> Result<(), StateError> {
    let created = store
        .create_reminder(one_time("conf-u3", Some("conf-del"), "2025-01-01T00:00:00Z"))
        .await?
        .into_reminder();

    let fetched = store.get_reminder(created.id).await?;
    assert_eq!(fetched.as_ref(), Some(&created));

    assert!(store.delete_reminder(created.id).await?, "delete existing");
    assert!(store.get_reminder(created.id).await?.is_none());
    assert!(!store.delete_reminder(created.id).await?, "delete missing");
    assert!(store.get_reminder(Uuid::new_v4()).await?.is_none());
    Ok(())
}

async fn test_list_filters(store: &dyn ReminderStore) -> Result<(), StateError> {
    store
        .create_reminder(one_time("conf-list", Some("conf-list-1"), "2025-01-01T00:00:00Z"))
        .await?;
    store
        .create_reminder(one_time("conf-list", Some("conf-list-2"), "2025-01-02T00:00:00Z"))
        .await?;

    let all = store
        .list_reminders(&ReminderFilter {
            user_id: Some("conf-list".into()),
            ..ReminderFilter::default()
        })
        .await?;
    assert_eq!(all.len(), 2);
    assert!(
        all[0].reminder_time >= all[1].reminder_time,
        "listing is newest-first"
    );

    let windowed = store
        .list_reminders(&ReminderFilter {
            user_id: Some("conf-list".into()),
            start: Some(utc("2025-01-02T00:00:00Z")),
            ..ReminderFilter::default()
        })
        .await?;
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].external_id.as_deref(), Some("conf-list-2"));
    Ok(())
}

async fn test_set_status(store: &dyn ReminderStore) -> Result<(), StateError> {
    let created = store
        .create_reminder(one_time("conf-u4", Some("conf-status"), "2025-01-01T00:00:00Z"))
        .await?
        .into_reminder();

    let now = utc("2025-01-02T00:00:00Z");
    assert!(store.mark_acknowledged(created.id, now).await?);
    let row = store.get_reminder(created.id).await?.expect("row exists");
    assert_eq!(row.status, ReminderStatus::Acknowledged);
    assert_eq!(row.updated_at, now);

    // Acknowledging again is a no-op beyond the timestamp.
    assert!(store.mark_acknowledged(created.id, now).await?);
    assert!(
        !store.set_status(Uuid::new_v4(), ReminderStatus::Queued, now).await?,
        "status update on missing row affects nothing"
    );
    Ok(())
}

async fn test_due_reminders_boundary(store: &dyn ReminderStore) -> Result<(), StateError> {
    let now = utc("2025-03-01T12:00:00Z");
    let due = store
        .create_reminder(one_time("conf-due", Some("conf-due-eq"), "2025-03-01T12:00:00Z"))
        .await?
        .into_reminder();
    store
        .create_reminder(one_time("conf-due", Some("conf-due-future"), "2025-03-01T12:00:01Z"))
        .await?;
    let queued = store
        .create_reminder(one_time("conf-due", Some("conf-due-queued"), "2025-03-01T00:00:00Z"))
        .await?
        .into_reminder();
    store.mark_queued(queued.id, now).await?;
    store
        .create_reminder(template("conf-due", "conf-due-template", "2025-03-01T00:00:00Z", None))
        .await?;

    let picked = store.get_due_reminders(now, 100).await?;
    let ids: Vec<Uuid> = picked.iter().map(|r| r.id).collect();
    assert!(
        ids.contains(&due.id),
        "reminder_time == now is due (<= comparison)"
    );
    assert!(
        picked.iter().all(|r| !r.is_recurring),
        "templates are never dispatched"
    );
    assert!(
        picked.iter().all(|r| r.status == ReminderStatus::Pending),
        "only Pending rows are due"
    );
    assert!(
        picked.windows(2).all(|w| w[0].reminder_time <= w[1].reminder_time),
        "due rows are ordered ascending"
    );
    Ok(())
}

async fn test_due_recurring_eligibility(store: &dyn ReminderStore) -> Result<(), StateError> {
    let now = utc("2025-04-01T00:00:00Z");

    let eligible = store
        .create_reminder(template("conf-rec", "conf-rec-ok", "2025-04-01T00:00:00Z", None))
        .await?
        .into_reminder();

    let inactive = store
        .create_reminder(template("conf-rec", "conf-rec-off", "2025-03-01T00:00:00Z", None))
        .await?
        .into_reminder();
    store.deactivate(inactive.id, true, now).await?;

    let mut ended = template("conf-rec", "conf-rec-ended", "2025-03-01T00:00:00Z", None);
    ended.end_date = Some(utc("2025-04-01T00:00:00Z"));
    store.create_reminder(ended).await?;

    let due = store.get_due_recurring(now, 100).await?;
    let ids: Vec<Uuid> = due.iter().map(|r| r.id).collect();
    assert!(
        ids.contains(&eligible.id),
        "next_occurrence == now is eligible"
    );
    assert!(!ids.contains(&inactive.id), "deactivated template excluded");
    assert!(
        due.iter().all(|r| r.end_date.is_none_or(|e| e > now)),
        "end_date == now excludes the template"
    );
    Ok(())
}

async fn test_advance_template(store: &dyn ReminderStore) -> Result<(), StateError> {
    let tpl = store
        .create_reminder(template("conf-adv", "conf-adv-1", "2025-02-10T09:00:00Z", Some(3)))
        .await?
        .into_reminder();

    let now = utc("2025-02-10T09:00:05Z");
    let occurrence = tpl.spawn_occurrence(now);
    let advanced = store
        .advance_template(TemplateAdvance {
            template_id: tpl.id,
            occurrence: occurrence.clone(),
            last_occurrence: utc("2025-02-10T09:00:00Z"),
            next_occurrence: Some(utc("2025-02-11T09:00:00Z")),
            occurrence_count: 1,
            deactivate: false,
            now,
        })
        .await?;

    assert_eq!(advanced.id, occurrence.id);
    assert_eq!(advanced.occurrence_number, Some(1));
    assert_eq!(advanced.external_id.as_deref(), Some("conf-adv-1_1"));

    let tpl = store.get_reminder(tpl.id).await?.expect("template exists");
    assert_eq!(tpl.occurrence_count, 1);
    assert_eq!(tpl.last_occurrence, Some(utc("2025-02-10T09:00:00Z")));
    assert_eq!(tpl.next_occurrence, Some(utc("2025-02-11T09:00:00Z")));
    assert!(tpl.is_active);
    Ok(())
}

async fn test_advance_template_deactivates(store: &dyn ReminderStore) -> Result<(), StateError> {
    let tpl = store
        .create_reminder(template("conf-adv2", "conf-adv-2", "2025-02-10T09:00:00Z", Some(1)))
        .await?
        .into_reminder();

    let now = utc("2025-02-10T09:00:05Z");
    store
        .advance_template(TemplateAdvance {
            template_id: tpl.id,
            occurrence: tpl.spawn_occurrence(now),
            last_occurrence: utc("2025-02-10T09:00:00Z"),
            next_occurrence: None,
            occurrence_count: 1,
            deactivate: true,
            now,
        })
        .await?;

    let tpl = store.get_reminder(tpl.id).await?.expect("template exists");
    assert!(!tpl.is_active, "max_occurrences reached deactivates");
    assert_eq!(tpl.status, ReminderStatus::Processed);
    assert_eq!(tpl.next_occurrence, None);
    Ok(())
}

async fn test_find_expired_boundary(store: &dyn ReminderStore) -> Result<(), StateError> {
    let now = utc("2025-05-01T00:00:00Z");
    let mut at_boundary = template("conf-exp", "conf-exp-eq", "2025-04-01T00:00:00Z", None);
    at_boundary.end_date = Some(now);
    let at_boundary = store.create_reminder(at_boundary).await?.into_reminder();

    let expired = store.find_expired(now, 100).await?;
    let ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
    assert!(
        ids.contains(&at_boundary.id),
        "end_date == now is treated as expired"
    );

    store.deactivate(at_boundary.id, true, now).await?;
    let expired = store.find_expired(now, 100).await?;
    assert!(
        !expired.iter().any(|r| r.id == at_boundary.id),
        "deactivated rows are no longer cleanup candidates"
    );
    Ok(())
}

async fn test_device_token_latest_semantics(store: &dyn ReminderStore) -> Result<(), StateError> {
    let first = store
        .upsert_device_token(
            DeviceTokenRegistration {
                user_id: "conf-tok".into(),
                platform: Platform::Ios,
                fcm_token: "tok-1".into(),
            },
            utc("2025-01-01T00:00:00Z"),
        )
        .await?;

    let replaced = store
        .upsert_device_token(
            DeviceTokenRegistration {
                user_id: "conf-tok".into(),
                platform: Platform::Ios,
                fcm_token: "tok-2".into(),
            },
            utc("2025-01-02T00:00:00Z"),
        )
        .await?;
    assert_eq!(replaced.id, first.id, "upsert replaces, not duplicates");

    let latest = store
        .latest_token("conf-tok", Platform::Ios)
        .await?
        .expect("token exists");
    assert_eq!(latest.fcm_token, "tok-2");

    assert!(
        store.latest_token("conf-tok", Platform::Android).await?.is_none(),
        "tokens are scoped per platform"
    );

    let listed = store
        .list_device_tokens(Some("conf-tok"), None, 10)
        .await?;
    assert_eq!(listed.len(), 1);
    Ok(())
}
