//! Storage traits for the reminders service.
//!
//! [`ReminderStore`] is the single source of truth for reminder and device
//! token state; backends live in sibling crates (`remind-state-memory`,
//! `remind-state-postgres`). [`SuppressionSource`] and [`UserProfileSource`]
//! cover the two read-only lookups that reach outside the reminders tables.

pub mod error;
pub mod store;
pub mod testing;

pub use error::StateError;
pub use store::{
    CreateOutcome, ReminderStats, ReminderStore, SuppressionSource, TemplateAdvance,
    UserProfileSource,
};
