//! In-memory backends for tests and single-process development mode.

pub mod sources;
pub mod store;

pub use sources::{MemorySuppressionSource, MemoryUserProfileSource};
pub use store::MemoryReminderStore;
