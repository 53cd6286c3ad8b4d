//! Core domain types for the reminders service.
//!
//! This crate is pure: it defines the unified reminder model (one-time
//! reminders, recurring templates, and generated occurrences), device
//! tokens, the wire events exchanged over the message bus, and the
//! recurrence engine that computes firing instants. All I/O lives in the
//! sibling crates.

pub mod event;
pub mod recurrence;
pub mod reminder;

pub use event::{CreateReminder, DispatchEvent, QueuedReminder};
pub use recurrence::{RecurrenceError, RecurrencePattern};
pub use reminder::{
    DeviceToken, DeviceTokenRegistration, Platform, Reminder, ReminderFilter, ReminderPatch,
    ReminderStatus, ValidationError,
};
