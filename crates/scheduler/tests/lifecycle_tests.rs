//! End-to-end lifecycle tests over the in-memory store and bus.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::StreamExt;
use serde_json::{Map, Value};

use remind_bus::{BusError, Delivery, DeliveryStream, MemoryBus, MessageBus};
use remind_core::{
    CreateReminder, DeviceTokenRegistration, DispatchEvent, Platform, RecurrencePattern,
    ReminderStatus,
};
use remind_push::{PushClient, PushError, PushMessage};
use remind_scheduler::{
    DispatchWorker, ReminderMetrics, Scheduler, SchedulerConfig, create_from_event,
};
use remind_state::ReminderStore;
use remind_state_memory::{MemoryReminderStore, MemorySuppressionSource, MemoryUserProfileSource};

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn grace() -> chrono::Duration {
    chrono::Duration::seconds(60)
}

struct Harness {
    store: Arc<MemoryReminderStore>,
    bus: Arc<MemoryBus>,
    suppression: Arc<MemorySuppressionSource>,
    profiles: Arc<MemoryUserProfileSource>,
    metrics: Arc<ReminderMetrics>,
    scheduler: Scheduler,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryReminderStore::new());
    let bus = Arc::new(MemoryBus::default());
    let suppression = Arc::new(MemorySuppressionSource::new());
    let profiles = Arc::new(MemoryUserProfileSource::new());
    let metrics = Arc::new(ReminderMetrics::default());
    let scheduler = Scheduler::new(
        store.clone(),
        bus.clone(),
        suppression.clone(),
        profiles.clone(),
        metrics.clone(),
        SchedulerConfig::default(),
    );
    Harness {
        store,
        bus,
        suppression,
        profiles,
        metrics,
        scheduler,
    }
}

fn one_time_event(user: &str, external_id: &str, time: &str) -> CreateReminder {
    CreateReminder {
        user_id: user.into(),
        reminder_type: "ping".into(),
        title: None,
        message: None,
        payload: Map::new(),
        reminder_time: Some(utc(time)),
        external_id: Some(external_id.into()),
        recurrence_pattern: None,
        start_date: None,
        end_date: None,
        max_occurrences: None,
        timezone: None,
    }
}

fn daily_template_event(user: &str, external_id: &str, start: &str, max: i32) -> CreateReminder {
    CreateReminder {
        user_id: user.into(),
        reminder_type: "medication".into(),
        title: Some("Take meds".into()),
        message: None,
        payload: Map::new(),
        reminder_time: None,
        external_id: Some(external_id.into()),
        recurrence_pattern: Some(RecurrencePattern::Daily {
            interval: 1,
            end_date: None,
            max_occurrences: Some(max),
        }),
        start_date: Some(utc(start)),
        end_date: None,
        max_occurrences: Some(max),
        timezone: None,
    }
}

/// Push client that records every message it is asked to send.
#[derive(Default)]
struct RecordingPushClient {
    sent: Mutex<Vec<PushMessage>>,
}

#[async_trait]
impl PushClient for RecordingPushClient {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok("msg-1".into())
    }
}

/// Bus whose publishes always fail.
struct FailingBus;

#[async_trait]
impl MessageBus for FailingBus {
    async fn publish(&self, _routing_key: &str, _payload: &[u8]) -> Result<(), BusError> {
        Err(BusError::Publish("broker unavailable".into()))
    }

    async fn consume(&self, _queue: &str) -> Result<DeliveryStream, BusError> {
        Ok(futures::stream::empty::<Delivery>().boxed())
    }
}

#[tokio::test]
async fn one_time_reminder_flows_to_push() {
    let h = harness();
    let created_at = utc("2024-12-31T00:00:00Z");
    let row = create_from_event(
        h.store.as_ref(),
        &one_time_event("U1", "e1", "2025-01-01T00:00:00Z"),
        created_at,
        grace(),
    )
    .await
    .unwrap()
    .into_reminder();
    assert_eq!(row.status, ReminderStatus::Pending);

    let scan_at = utc("2025-01-01T00:00:05Z");
    let dispatched = h.scheduler.scan_and_dispatch(scan_at).await.unwrap();
    assert_eq!(dispatched, 1);

    let stored = h.store.get_reminder(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Queued);

    let mut output = h.bus.consume("reminders.dispatch").await.unwrap();
    let delivery = output.next().await.unwrap();
    let event: DispatchEvent = serde_json::from_slice(delivery.payload()).unwrap();
    assert_eq!(event.reminder_id, row.id);
    assert_eq!(event.user_id, "U1");
    assert_eq!(event.timestamp, utc("2025-01-01T00:00:00Z"));
    delivery.ack().await.unwrap();

    // Deliver through the dispatch worker.
    h.store
        .upsert_device_token(
            DeviceTokenRegistration {
                user_id: "U1".into(),
                platform: Platform::Ios,
                fcm_token: "tok-u1".into(),
            },
            scan_at,
        )
        .await
        .unwrap();
    let push = Arc::new(RecordingPushClient::default());
    let worker = DispatchWorker::new(
        h.store.clone(),
        h.bus.clone(),
        push.clone(),
        h.profiles.clone(),
        h.metrics.clone(),
        "reminders.dispatch",
        chrono_tz::Tz::UTC,
    );
    worker.handle(&event, utc("2025-01-01T00:00:06Z")).await;

    let sent = push.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].token, "tok-u1");
    assert_eq!(
        sent[0].data.get("timestamp_utc").unwrap(),
        "2025-01-01T00:00:00+00:00"
    );
    assert_eq!(
        sent[0].data.get("reminder_id").unwrap(),
        &row.id.to_string()
    );
    drop(sent);

    let stored = h.store.get_reminder(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Processed);
    assert_eq!(h.metrics.snapshot().dispatch_success, 1);
}

#[tokio::test]
async fn daily_template_terminates_after_max_occurrences() {
    let h = harness();
    let template = create_from_event(
        h.store.as_ref(),
        &daily_template_event("U2", "tpl-daily", "2025-02-10T09:00:00Z", 3),
        utc("2025-02-01T00:00:00Z"),
        grace(),
    )
    .await
    .unwrap()
    .into_reminder();

    let expected = [
        "2025-02-10T09:00:00Z",
        "2025-02-11T09:00:00Z",
        "2025-02-12T09:00:00Z",
    ];
    for (day, want) in expected.iter().enumerate() {
        let now = utc(want) + chrono::Duration::seconds(5);
        let generated = h.scheduler.generate_recurring(now).await.unwrap();
        assert_eq!(generated, 1, "day {day} should generate one occurrence");
    }

    let children = h
        .store
        .list_reminders(&remind_core::ReminderFilter {
            user_id: Some("U2".into()),
            is_recurring: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(children.len(), 3);

    let mut ordered = children.clone();
    ordered.sort_by_key(|r| r.occurrence_number);
    for (i, child) in ordered.iter().enumerate() {
        let number = i32::try_from(i).unwrap() + 1;
        assert_eq!(child.occurrence_number, Some(number));
        assert_eq!(child.reminder_time, utc(expected[i]));
        assert_eq!(
            child.external_id.as_deref(),
            Some(format!("tpl-daily_{number}").as_str())
        );
        assert_eq!(child.parent_reminder_id, Some(template.id));
    }
    // Monotonic reminder times across occurrence numbers.
    assert!(
        ordered
            .windows(2)
            .all(|w| w[0].reminder_time <= w[1].reminder_time)
    );

    let template = h.store.get_reminder(template.id).await.unwrap().unwrap();
    assert!(!template.is_active);
    assert_eq!(template.status, ReminderStatus::Processed);
    assert_eq!(template.next_occurrence, None);
    assert_eq!(template.occurrence_count, 3);

    // Nothing further once retired.
    let generated = h
        .scheduler
        .generate_recurring(utc("2025-02-13T09:00:05Z"))
        .await
        .unwrap();
    assert_eq!(generated, 0);
}

#[tokio::test]
async fn expansion_is_single_pass_per_tick() {
    let h = harness();
    create_from_event(
        h.store.as_ref(),
        &daily_template_event("U3", "tpl-once", "2025-02-10T09:00:00Z", 10),
        utc("2025-02-01T00:00:00Z"),
        grace(),
    )
    .await
    .unwrap();

    let now = utc("2025-02-10T09:00:05Z");
    assert_eq!(h.scheduler.generate_recurring(now).await.unwrap(), 1);
    // The template's next_occurrence has moved past `now`; a second pass in
    // the same tick finds nothing.
    assert_eq!(h.scheduler.generate_recurring(now).await.unwrap(), 0);
}

#[tokio::test]
async fn nutrition_reminder_is_skipped_when_meal_logged() {
    let h = harness();
    let mut payload = Map::new();
    payload.insert("meal".into(), Value::String("lunch".into()));
    let event = CreateReminder {
        user_id: "9".into(),
        reminder_type: "nutrition_log".into(),
        title: None,
        message: None,
        payload,
        reminder_time: Some(utc("2025-04-01T07:30:00Z")),
        external_id: Some("nut-1".into()),
        recurrence_pattern: None,
        start_date: None,
        end_date: None,
        max_occurrences: None,
        timezone: Some("Asia/Kolkata".into()),
    };
    let row = create_from_event(h.store.as_ref(), &event, utc("2025-04-01T00:00:00Z"), grace())
        .await
        .unwrap()
        .into_reminder();

    // 07:30 UTC is 13:00 local; the local date is 2025-04-01.
    h.suppression
        .log_meal("9", NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), "lunch");

    let dispatched = h
        .scheduler
        .scan_and_dispatch(utc("2025-04-01T07:30:05Z"))
        .await
        .unwrap();
    assert_eq!(dispatched, 0);

    let stored = h.store.get_reminder(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Skipped);
    assert_eq!(h.metrics.snapshot().suppressed, 1);
}

#[tokio::test]
async fn nutrition_reminder_dispatches_without_a_log() {
    let h = harness();
    let mut payload = Map::new();
    payload.insert("meal".into(), Value::String("lunch".into()));
    let event = CreateReminder {
        user_id: "9".into(),
        reminder_type: "nutrition_log".into(),
        title: None,
        message: None,
        payload,
        reminder_time: Some(utc("2025-04-01T07:30:00Z")),
        external_id: Some("nut-2".into()),
        recurrence_pattern: None,
        start_date: None,
        end_date: None,
        max_occurrences: None,
        timezone: Some("Asia/Kolkata".into()),
    };
    let row = create_from_event(h.store.as_ref(), &event, utc("2025-04-01T00:00:00Z"), grace())
        .await
        .unwrap()
        .into_reminder();

    let dispatched = h
        .scheduler
        .scan_and_dispatch(utc("2025-04-01T07:30:05Z"))
        .await
        .unwrap();
    assert_eq!(dispatched, 1);

    let stored = h.store.get_reminder(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Queued);
}

#[tokio::test]
async fn publish_failure_marks_the_row_failed() {
    let store = Arc::new(MemoryReminderStore::new());
    let metrics = Arc::new(ReminderMetrics::default());
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(FailingBus),
        Arc::new(MemorySuppressionSource::new()),
        Arc::new(MemoryUserProfileSource::new()),
        metrics.clone(),
        SchedulerConfig::default(),
    );

    let row = create_from_event(
        store.as_ref(),
        &one_time_event("U4", "fail-1", "2025-01-01T00:00:00Z"),
        utc("2024-12-31T00:00:00Z"),
        grace(),
    )
    .await
    .unwrap()
    .into_reminder();

    let dispatched = scheduler
        .scan_and_dispatch(utc("2025-01-01T00:00:05Z"))
        .await
        .unwrap();
    assert_eq!(dispatched, 0);

    let stored = store.get_reminder(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Failed);
    assert_eq!(metrics.snapshot().publish_failures, 1);
}

#[tokio::test]
async fn cleanup_retires_one_time_rows_past_their_window() {
    let h = harness();
    let row = create_from_event(
        h.store.as_ref(),
        &one_time_event("U5", "missed-1", "2025-01-01T00:00:00Z"),
        utc("2024-12-31T00:00:00Z"),
        grace(),
    )
    .await
    .unwrap()
    .into_reminder();
    // end_date = reminder_time + 60s grace.
    assert_eq!(row.end_date, Some(utc("2025-01-01T00:01:00Z")));

    // end_date exactly equal to now is treated as expired.
    let cleaned = h
        .scheduler
        .cleanup_expired(utc("2025-01-01T00:01:00Z"))
        .await
        .unwrap();
    assert_eq!(cleaned, 1);

    let stored = h.store.get_reminder(row.id).await.unwrap().unwrap();
    assert!(!stored.is_active);
    // One-time rows keep their status; only templates become Processed.
    assert_eq!(stored.status, ReminderStatus::Pending);
}

#[tokio::test]
async fn missing_token_counts_a_failure_without_erroring() {
    let h = harness();
    let push = Arc::new(RecordingPushClient::default());
    let worker = DispatchWorker::new(
        h.store.clone(),
        h.bus.clone(),
        push.clone(),
        h.profiles.clone(),
        h.metrics.clone(),
        "reminders.dispatch",
        chrono_tz::Tz::UTC,
    );

    let event = DispatchEvent {
        user_id: "nobody".into(),
        reminder_id: uuid::Uuid::new_v4(),
        reminder_type: "ping".into(),
        payload: Map::new(),
        timestamp: utc("2025-01-01T00:00:00Z"),
    };
    worker.handle(&event, utc("2025-01-01T00:00:05Z")).await;

    assert!(push.sent.lock().unwrap().is_empty());
    assert_eq!(h.metrics.snapshot().dispatch_failed, 1);
}

#[tokio::test]
async fn local_timestamp_uses_profile_timezone() {
    let h = harness();
    h.profiles.set_timezone("U6", "Asia/Kolkata");
    h.store
        .upsert_device_token(
            DeviceTokenRegistration {
                user_id: "U6".into(),
                platform: Platform::Ios,
                fcm_token: "tok-u6".into(),
            },
            utc("2025-01-01T00:00:00Z"),
        )
        .await
        .unwrap();

    let push = Arc::new(RecordingPushClient::default());
    let worker = DispatchWorker::new(
        h.store.clone(),
        h.bus.clone(),
        push.clone(),
        h.profiles.clone(),
        h.metrics.clone(),
        "reminders.dispatch",
        chrono_tz::Tz::UTC,
    );

    let event = DispatchEvent {
        user_id: "U6".into(),
        reminder_id: uuid::Uuid::new_v4(),
        reminder_type: "ping".into(),
        payload: Map::new(),
        timestamp: utc("2025-04-01T07:30:00Z"),
    };
    worker.handle(&event, utc("2025-04-01T07:30:05Z")).await;

    let sent = push.sent.lock().unwrap();
    assert_eq!(
        sent[0].data.get("timestamp_utc").unwrap(),
        "2025-04-01T07:30:00+00:00"
    );
    assert_eq!(
        sent[0].data.get("timestamp_local").unwrap(),
        "2025-04-01T13:00:00+05:30"
    );
    // Distinct notification ids double as collapse keys.
    assert_eq!(
        sent[0].data.get("notification_id").unwrap(),
        &sent[0].collapse_id
    );
}

#[tokio::test]
async fn duplicate_creation_events_dedupe_on_external_id() {
    let h = harness();
    let event = one_time_event("U7", "dup-1", "2025-01-01T00:00:00Z");

    let first = create_from_event(h.store.as_ref(), &event, utc("2024-12-30T00:00:00Z"), grace())
        .await
        .unwrap();
    assert!(!first.is_existing());
    let first = first.into_reminder();

    let second = create_from_event(h.store.as_ref(), &event, utc("2024-12-31T00:00:00Z"), grace())
        .await
        .unwrap();
    assert!(second.is_existing());
    let second = second.into_reminder();

    assert_eq!(second.id, first.id);
    assert_eq!(second.created_at, first.created_at);

    let all = h
        .store
        .list_reminders(&remind_core::ReminderFilter {
            user_id: Some("U7".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}
