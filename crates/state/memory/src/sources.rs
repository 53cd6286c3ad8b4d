use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDate;

use remind_state::error::StateError;
use remind_state::store::{SuppressionSource, UserProfileSource};

/// In-memory nutrition-log fake for suppression tests.
#[derive(Debug, Default)]
pub struct MemorySuppressionSource {
    logged: RwLock<HashSet<(String, NaiveDate, String)>>,
    /// When set, every lookup fails; used to exercise fail-open behavior.
    fail: RwLock<bool>,
}

impl MemorySuppressionSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a logged meal for (`user_id`, `local_date`).
    pub fn log_meal(&self, user_id: &str, local_date: NaiveDate, meal: &str) {
        self.logged
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((user_id.to_owned(), local_date, meal.to_owned()));
    }

    /// Make subsequent lookups fail with a backend error.
    pub fn fail_lookups(&self, fail: bool) {
        *self
            .fail
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = fail;
    }
}

#[async_trait]
impl SuppressionSource for MemorySuppressionSource {
    async fn was_meal_logged(
        &self,
        user_id: &str,
        local_date: NaiveDate,
        meal: &str,
    ) -> Result<bool, StateError> {
        if *self
            .fail
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
        {
            return Err(StateError::Backend("suppression source unavailable".into()));
        }
        Ok(self
            .logged
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&(user_id.to_owned(), local_date, meal.to_owned())))
    }
}

/// In-memory user-profile timezone fake.
#[derive(Debug, Default)]
pub struct MemoryUserProfileSource {
    timezones: RwLock<HashMap<String, String>>,
}

impl MemoryUserProfileSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user's profile timezone.
    pub fn set_timezone(&self, user_id: &str, timezone: &str) {
        self.timezones
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(user_id.to_owned(), timezone.to_owned());
    }
}

#[async_trait]
impl UserProfileSource for MemoryUserProfileSource {
    async fn timezone_for(&self, user_id: &str) -> Result<Option<String>, StateError> {
        Ok(self
            .timezones
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn meal_lookup_and_fail_mode() {
        let source = MemorySuppressionSource::new();
        let date = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        assert!(!source.was_meal_logged("u1", date, "lunch").await.unwrap());
        source.log_meal("u1", date, "lunch");
        assert!(source.was_meal_logged("u1", date, "lunch").await.unwrap());
        assert!(!source.was_meal_logged("u1", date, "dinner").await.unwrap());

        source.fail_lookups(true);
        assert!(source.was_meal_logged("u1", date, "lunch").await.is_err());
    }

    #[tokio::test]
    async fn profile_timezone_lookup() {
        let source = MemoryUserProfileSource::new();
        assert_eq!(source.timezone_for("u1").await.unwrap(), None);
        source.set_timezone("u1", "Asia/Kolkata");
        assert_eq!(
            source.timezone_for("u1").await.unwrap().as_deref(),
            Some("Asia/Kolkata")
        );
    }
}
