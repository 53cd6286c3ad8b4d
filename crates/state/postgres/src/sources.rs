use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::debug;

use remind_state::error::StateError;
use remind_state::store::{SuppressionSource, UserProfileSource};

/// Suppression source backed by the nutrition log table.
///
/// This is the single place the service reads outside its own tables. The
/// caller treats any error as "not logged" (fail-open), so a missing table
/// or schema drift never blocks dispatch.
pub struct PostgresSuppressionSource {
    pool: PgPool,
    table: String,
}

impl PostgresSuppressionSource {
    /// Create a source reading the default `nutrition_raw_data` table.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: "nutrition_raw_data".into(),
        }
    }

    /// Override the table name (tests, non-standard schemas).
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
}

#[async_trait]
impl SuppressionSource for PostgresSuppressionSource {
    async fn was_meal_logged(
        &self,
        user_id: &str,
        local_date: NaiveDate,
        meal: &str,
    ) -> Result<bool, StateError> {
        // The nutrition table keys users by integer id; a non-numeric
        // reminder user id can never match.
        let Ok(user_id) = user_id.parse::<i64>() else {
            return Ok(false);
        };

        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE user_id = $1 AND meal_date = $2 AND meal_type = $3",
            self.table
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(local_date)
            .bind(meal)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        debug!(user_id, %local_date, meal, count, "nutrition suppression lookup");
        Ok(count >= 1)
    }
}

/// Timezone lookup against the user profile table.
pub struct PostgresUserProfileSource {
    pool: PgPool,
    table: String,
}

impl PostgresUserProfileSource {
    /// Create a source reading the default `user_profiles` table.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: "user_profiles".into(),
        }
    }

    /// Override the table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
}

#[async_trait]
impl UserProfileSource for PostgresUserProfileSource {
    async fn timezone_for(&self, user_id: &str) -> Result<Option<String>, StateError> {
        let Ok(user_id) = user_id.parse::<i64>() else {
            return Ok(None);
        };

        let sql = format!("SELECT timezone FROM {} WHERE user_id = $1", self.table);
        let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(row.and_then(|(tz,)| tz).filter(|tz| !tz.is_empty()))
    }
}
