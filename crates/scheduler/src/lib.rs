//! Periodic scans and queue workers for the reminders service.
//!
//! Three periodic procedures drive the reminder lifecycle: the expansion
//! scan materializes due occurrences from recurring templates, the
//! dispatch scan turns due occurrences into dispatch events, and the
//! expiration cleanup retires rows past their bounds. Two queue workers
//! flank them: [`IngestWorker`] consumes creation events into the store,
//! and [`DispatchWorker`] consumes dispatch events into push sends.

pub mod dispatch;
pub mod ingest;
pub mod metrics;
pub mod scheduler;
pub mod suppression;
pub mod timezone;

pub use dispatch::DispatchWorker;
pub use ingest::{IngestError, IngestWorker, create_from_event};
pub use metrics::{MetricsSnapshot, ReminderMetrics};
pub use scheduler::{Scheduler, SchedulerConfig};
