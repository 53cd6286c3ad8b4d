use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking reminder lifecycle outcomes.
///
/// All counters use relaxed ordering; for a consistent point-in-time view
/// call [`snapshot`](Self::snapshot). One instance is shared by the API,
/// the scheduler, and the workers.
#[derive(Debug, Default)]
pub struct ReminderMetrics {
    /// Reminders created through ingestion.
    pub created: AtomicU64,
    /// Creates that hit an existing `external_id`.
    pub idempotent_hits: AtomicU64,
    /// Reminders acknowledged by clients.
    pub acknowledged: AtomicU64,
    /// Scheduler scan cycles (expansion + dispatch).
    pub scheduler_scans: AtomicU64,
    /// Reminders published to the output queue.
    pub scheduler_dispatched: AtomicU64,
    /// Occurrences materialized from templates.
    pub occurrences_generated: AtomicU64,
    /// Reminders skipped by suppression rules.
    pub suppressed: AtomicU64,
    /// Output-queue publish failures.
    pub publish_failures: AtomicU64,
    /// Creation events dropped or failed in ingestion.
    pub ingest_failures: AtomicU64,
    /// Successful push dispatches.
    pub dispatch_success: AtomicU64,
    /// Failed push dispatches (missing token, provider error, timeout).
    pub dispatch_failed: AtomicU64,
    /// Rows deactivated by expiration cleanup.
    pub expired_cleaned: AtomicU64,
}

impl ReminderMetrics {
    /// Increment the created counter.
    pub fn increment_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the idempotent-hit counter.
    pub fn increment_idempotent_hits(&self) {
        self.idempotent_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the acknowledged counter.
    pub fn increment_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the scan-cycle counter.
    pub fn increment_scheduler_scans(&self) {
        self.scheduler_scans.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the dispatched counter.
    pub fn increment_scheduler_dispatched(&self) {
        self.scheduler_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the generated-occurrences counter.
    pub fn increment_occurrences_generated(&self) {
        self.occurrences_generated.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the suppressed counter.
    pub fn increment_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the publish-failure counter.
    pub fn increment_publish_failures(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the ingest-failure counter.
    pub fn increment_ingest_failures(&self) {
        self.ingest_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the push-success counter.
    pub fn increment_dispatch_success(&self) {
        self.dispatch_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the push-failure counter.
    pub fn increment_dispatch_failed(&self) {
        self.dispatch_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the cleanup counter.
    pub fn increment_expired_cleaned(&self) {
        self.expired_cleaned.fetch_add(1, Ordering::Relaxed);
    }

    /// A consistent point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            idempotent_hits: self.idempotent_hits.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            scheduler_scans: self.scheduler_scans.load(Ordering::Relaxed),
            scheduler_dispatched: self.scheduler_dispatched.load(Ordering::Relaxed),
            occurrences_generated: self.occurrences_generated.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            ingest_failures: self.ingest_failures.load(Ordering::Relaxed),
            dispatch_success: self.dispatch_success.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            expired_cleaned: self.expired_cleaned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`ReminderMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub idempotent_hits: u64,
    pub acknowledged: u64,
    pub scheduler_scans: u64,
    pub scheduler_dispatched: u64,
    pub occurrences_generated: u64,
    pub suppressed: u64,
    pub publish_failures: u64,
    pub ingest_failures: u64,
    pub dispatch_success: u64,
    pub dispatch_failed: u64,
    pub expired_cleaned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = ReminderMetrics::default();
        metrics.increment_created();
        metrics.increment_created();
        metrics.increment_suppressed();

        let snap = metrics.snapshot();
        assert_eq!(snap.created, 2);
        assert_eq!(snap.suppressed, 1);
        assert_eq!(snap.dispatch_failed, 0);
    }
}
