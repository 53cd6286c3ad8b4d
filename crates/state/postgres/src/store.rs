use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use remind_core::{
    DeviceToken, DeviceTokenRegistration, Platform, Reminder, ReminderFilter, ReminderStatus,
};
use remind_state::error::StateError;
use remind_state::store::{
    CreateOutcome, ReminderStats, ReminderStore, TemplateAdvance,
};

use crate::config::PostgresConfig;
use crate::migrations;

const DEFAULT_LIST_LIMIT: usize = 100;

/// PostgreSQL-backed implementation of [`ReminderStore`].
///
/// Uses `sqlx::PgPool` for connection pooling. Idempotent creation relies
/// on the partial unique index over `external_id`; template advancement
/// runs inside a transaction.
pub struct PostgresReminderStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresReminderStore {
    /// Connect to `PostgreSQL`, create the pool, and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if pool creation fails, or
    /// [`StateError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StateError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a store from an existing pool. Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StateError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// The underlying pool, for sharing with the suppression and profile
    /// sources.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const REMINDER_COLUMNS: &str = "id, user_id, reminder_type, title, message, payload, \
     reminder_time, status, external_id, recurrence_pattern, is_recurring, \
     parent_reminder_id, occurrence_number, is_generated, start_date, end_date, \
     max_occurrences, timezone, last_occurrence, next_occurrence, occurrence_count, \
     is_active, created_at, updated_at";

fn insert_sql(table: &str, skip_conflicts: bool) -> String {
    let mut sql = format!(
        "INSERT INTO {table} ({REMINDER_COLUMNS}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
          $17, $18, $19, $20, $21, $22, $23, $24)"
    );
    if skip_conflicts {
        sql.push_str(" ON CONFLICT (external_id) WHERE external_id IS NOT NULL DO NOTHING");
    }
    sql
}

fn bind_reminder<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    r: &Reminder,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    query
        .bind(r.id)
        .bind(r.user_id.clone())
        .bind(r.reminder_type.clone())
        .bind(r.title.clone())
        .bind(r.message.clone())
        .bind(serde_json::Value::Object(r.payload.clone()))
        .bind(r.reminder_time)
        .bind(r.status.as_str())
        .bind(r.external_id.clone())
        .bind(
            r.recurrence_pattern
                .as_ref()
                .map(|p| serde_json::to_value(p).unwrap_or_default()),
        )
        .bind(r.is_recurring)
        .bind(r.parent_reminder_id)
        .bind(r.occurrence_number)
        .bind(r.is_generated)
        .bind(r.start_date)
        .bind(r.end_date)
        .bind(r.max_occurrences)
        .bind(r.timezone.clone())
        .bind(r.last_occurrence)
        .bind(r.next_occurrence)
        .bind(r.occurrence_count)
        .bind(r.is_active)
        .bind(r.created_at)
        .bind(r.updated_at)
}

fn row_to_reminder(row: &PgRow) -> Result<Reminder, StateError> {
    let backend = |e: sqlx::Error| StateError::Backend(e.to_string());

    let status: String = row.try_get("status").map_err(backend)?;
    let status: ReminderStatus = status
        .parse()
        .map_err(|e: remind_core::ValidationError| StateError::Serialization(e.to_string()))?;

    let payload: serde_json::Value = row.try_get("payload").map_err(backend)?;
    let payload = payload.as_object().cloned().unwrap_or_default();

    let pattern: Option<serde_json::Value> =
        row.try_get("recurrence_pattern").map_err(backend)?;
    let recurrence_pattern = pattern
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StateError::Serialization(e.to_string()))?;

    Ok(Reminder {
        id: row.try_get("id").map_err(backend)?,
        user_id: row.try_get("user_id").map_err(backend)?,
        reminder_type: row.try_get("reminder_type").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        message: row.try_get("message").map_err(backend)?,
        payload,
        reminder_time: row.try_get("reminder_time").map_err(backend)?,
        status,
        external_id: row.try_get("external_id").map_err(backend)?,
        recurrence_pattern,
        is_recurring: row.try_get("is_recurring").map_err(backend)?,
        parent_reminder_id: row.try_get("parent_reminder_id").map_err(backend)?,
        occurrence_number: row.try_get("occurrence_number").map_err(backend)?,
        is_generated: row.try_get("is_generated").map_err(backend)?,
        start_date: row.try_get("start_date").map_err(backend)?,
        end_date: row.try_get("end_date").map_err(backend)?,
        max_occurrences: row.try_get("max_occurrences").map_err(backend)?,
        timezone: row.try_get("timezone").map_err(backend)?,
        last_occurrence: row.try_get("last_occurrence").map_err(backend)?,
        next_occurrence: row.try_get("next_occurrence").map_err(backend)?,
        occurrence_count: row.try_get("occurrence_count").map_err(backend)?,
        is_active: row.try_get("is_active").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn row_to_token(row: &PgRow) -> Result<DeviceToken, StateError> {
    let backend = |e: sqlx::Error| StateError::Backend(e.to_string());

    let platform: String = row.try_get("platform").map_err(backend)?;
    let platform: Platform = platform
        .parse()
        .map_err(|e: remind_core::ValidationError| StateError::Serialization(e.to_string()))?;

    Ok(DeviceToken {
        id: row.try_get("id").map_err(backend)?,
        user_id: row.try_get("user_id").map_err(backend)?,
        platform,
        fcm_token: row.try_get("fcm_token").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

#[async_trait]
impl ReminderStore for PostgresReminderStore {
    async fn create_reminder(&self, mut reminder: Reminder) -> Result<CreateOutcome, StateError> {
        let table = self.config.reminders_table();

        // Backfill the idempotency key with the row id so redeliveries
        // without an explicit external_id still dedupe.
        if reminder.external_id.is_none() {
            reminder.external_id = Some(reminder.id.to_string());
        }

        let sql = insert_sql(&table, true);
        let result = bind_reminder(sqlx::query(&sql), &reminder)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(CreateOutcome::Created(reminder));
        }

        // Conflict: return the existing row unchanged.
        let select = format!("SELECT {REMINDER_COLUMNS} FROM {table} WHERE external_id = $1");
        let row = sqlx::query(&select)
            .bind(reminder.external_id.clone())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(CreateOutcome::Existing(row_to_reminder(&row)?))
    }

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StateError> {
        let table = self.config.reminders_table();
        let sql = format!("SELECT {REMINDER_COLUMNS} FROM {table} WHERE id = $1");

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        row.as_ref().map(row_to_reminder).transpose()
    }

    async fn list_reminders(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>, StateError> {
        let table = self.config.reminders_table();
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT {REMINDER_COLUMNS} FROM {table} WHERE TRUE"
        ));

        if let Some(ref user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(is_recurring) = filter.is_recurring {
            builder.push(" AND is_recurring = ").push_bind(is_recurring);
        }
        if let Some(is_active) = filter.is_active {
            builder.push(" AND is_active = ").push_bind(is_active);
        }
        if let Some(start) = filter.start {
            builder.push(" AND reminder_time >= ").push_bind(start);
        }
        if let Some(end) = filter.end {
            builder.push(" AND reminder_time <= ").push_bind(end);
        }

        let limit = i64::try_from(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT)).unwrap_or(i64::MAX);
        builder
            .push(" ORDER BY reminder_time DESC LIMIT ")
            .push_bind(limit);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        rows.iter().map(row_to_reminder).collect()
    }

    async fn update_reminder(&self, reminder: &Reminder) -> Result<Reminder, StateError> {
        let table = self.config.reminders_table();
        let sql = format!(
            "UPDATE {table} SET \
                title = $2, message = $3, payload = $4, reminder_time = $5, \
                status = $6, recurrence_pattern = $7, start_date = $8, end_date = $9, \
                max_occurrences = $10, timezone = $11, last_occurrence = $12, \
                next_occurrence = $13, occurrence_count = $14, is_active = $15, \
                updated_at = $16 \
             WHERE id = $1 \
             RETURNING {REMINDER_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(reminder.id)
            .bind(reminder.title.clone())
            .bind(reminder.message.clone())
            .bind(serde_json::Value::Object(reminder.payload.clone()))
            .bind(reminder.reminder_time)
            .bind(reminder.status.as_str())
            .bind(
                reminder
                    .recurrence_pattern
                    .as_ref()
                    .map(|p| serde_json::to_value(p).unwrap_or_default()),
            )
            .bind(reminder.start_date)
            .bind(reminder.end_date)
            .bind(reminder.max_occurrences)
            .bind(reminder.timezone.clone())
            .bind(reminder.last_occurrence)
            .bind(reminder.next_occurrence)
            .bind(reminder.occurrence_count)
            .bind(reminder.is_active)
            .bind(reminder.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        match row {
            Some(row) => row_to_reminder(&row),
            None => Err(StateError::NotFound(reminder.id.to_string())),
        }
    }

    async fn delete_reminder(&self, id: Uuid) -> Result<bool, StateError> {
        let table = self.config.reminders_table();
        let sql = format!("DELETE FROM {table} WHERE id = $1");

        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ReminderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        let table = self.config.reminders_table();
        let sql = format!("UPDATE {table} SET status = $1, updated_at = $2 WHERE id = $3");

        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError> {
        let table = self.config.reminders_table();
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM {table} \
             WHERE status = 'Pending' AND is_recurring = FALSE AND reminder_time <= $1 \
             ORDER BY reminder_time ASC LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        rows.iter().map(row_to_reminder).collect()
    }

    async fn get_due_recurring(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError> {
        let table = self.config.reminders_table();
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM {table} \
             WHERE is_recurring = TRUE AND is_active = TRUE \
               AND next_occurrence <= $1 \
               AND (end_date IS NULL OR end_date > $1) \
               AND (max_occurrences IS NULL OR occurrence_count < max_occurrences) \
             ORDER BY next_occurrence ASC LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        rows.iter().map(row_to_reminder).collect()
    }

    async fn advance_template(&self, advance: TemplateAdvance) -> Result<Reminder, StateError> {
        let table = self.config.reminders_table();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        let insert = insert_sql(&table, false);
        bind_reminder(sqlx::query(&insert), &advance.occurrence)
            .execute(&mut *tx)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        let update = if advance.deactivate {
            format!(
                "UPDATE {table} SET last_occurrence = $1, occurrence_count = $2, \
                    next_occurrence = NULL, is_active = FALSE, status = 'Processed', \
                    updated_at = $3 \
                 WHERE id = $4"
            )
        } else {
            format!(
                "UPDATE {table} SET last_occurrence = $1, occurrence_count = $2, \
                    next_occurrence = $5, updated_at = $3 \
                 WHERE id = $4"
            )
        };

        let mut query = sqlx::query(&update)
            .bind(advance.last_occurrence)
            .bind(advance.occurrence_count)
            .bind(advance.now)
            .bind(advance.template_id);
        if !advance.deactivate {
            query = query.bind(advance.next_occurrence);
        }

        let result = query
            .execute(&mut *tx)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| StateError::Backend(e.to_string()))?;
            return Err(StateError::NotFound(advance.template_id.to_string()));
        }

        tx.commit()
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(advance.occurrence)
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reminder>, StateError> {
        let table = self.config.reminders_table();
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM {table} \
             WHERE is_active = TRUE \
               AND (end_date <= $1 \
                    OR (max_occurrences IS NOT NULL \
                        AND occurrence_count >= max_occurrences)) \
             ORDER BY reminder_time ASC LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        rows.iter().map(row_to_reminder).collect()
    }

    async fn deactivate(
        &self,
        id: Uuid,
        as_processed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        let table = self.config.reminders_table();
        let sql = if as_processed {
            format!(
                "UPDATE {table} SET is_active = FALSE, status = 'Processed', \
                    next_occurrence = NULL, updated_at = $1 \
                 WHERE id = $2"
            )
        } else {
            format!("UPDATE {table} SET is_active = FALSE, updated_at = $1 WHERE id = $2")
        };

        let result = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn reminder_stats(&self, user_id: Option<&str>) -> Result<ReminderStats, StateError> {
        let table = self.config.reminders_table();
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE NOT is_recurring) AS one_time, \
                COUNT(*) FILTER (WHERE is_recurring) AS recurring, \
                COUNT(*) FILTER (WHERE is_recurring AND is_active) AS active_recurring, \
                COUNT(*) FILTER (WHERE status = 'Pending') AS pending, \
                COUNT(*) FILTER (WHERE status = 'Processed') AS processed \
             FROM {table} WHERE TRUE"
        ));
        if let Some(user_id) = user_id {
            builder.push(" AND user_id = ").push_bind(user_id.to_owned());
        }

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        let count = |name: &str| -> Result<u64, StateError> {
            let value: i64 = row
                .try_get(name)
                .map_err(|e| StateError::Backend(e.to_string()))?;
            Ok(u64::try_from(value).unwrap_or(0))
        };

        Ok(ReminderStats {
            total_reminders: count("total")?,
            one_time_reminders: count("one_time")?,
            recurring_reminders: count("recurring")?,
            active_recurring: count("active_recurring")?,
            pending_reminders: count("pending")?,
            processed_reminders: count("processed")?,
        })
    }

    async fn upsert_device_token(
        &self,
        registration: DeviceTokenRegistration,
        now: DateTime<Utc>,
    ) -> Result<DeviceToken, StateError> {
        let table = self.config.device_tokens_table();

        // Replace the most recent row for (user, platform) if one exists.
        let update = format!(
            "UPDATE {table} SET fcm_token = $1, updated_at = $2 \
             WHERE id = (SELECT id FROM {table} \
                         WHERE user_id = $3 AND platform = $4 \
                         ORDER BY created_at DESC LIMIT 1) \
             RETURNING id, user_id, platform, fcm_token, created_at, updated_at"
        );

        let row = sqlx::query(&update)
            .bind(registration.fcm_token.clone())
            .bind(now)
            .bind(registration.user_id.clone())
            .bind(registration.platform.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        if let Some(row) = row {
            return row_to_token(&row);
        }

        let insert = format!(
            "INSERT INTO {table} (id, user_id, platform, fcm_token, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, user_id, platform, fcm_token, created_at, updated_at"
        );

        let row = sqlx::query(&insert)
            .bind(Uuid::new_v4())
            .bind(registration.user_id)
            .bind(registration.platform.as_str())
            .bind(registration.fcm_token)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        row_to_token(&row)
    }

    async fn latest_token(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<DeviceToken>, StateError> {
        let table = self.config.device_tokens_table();
        let sql = format!(
            "SELECT id, user_id, platform, fcm_token, created_at, updated_at \
             FROM {table} WHERE user_id = $1 AND platform = $2 \
             ORDER BY created_at DESC LIMIT 1"
        );

        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(platform.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        row.as_ref().map(row_to_token).transpose()
    }

    async fn list_device_tokens(
        &self,
        user_id: Option<&str>,
        platform: Option<Platform>,
        limit: usize,
    ) -> Result<Vec<DeviceToken>, StateError> {
        let table = self.config.device_tokens_table();
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT id, user_id, platform, fcm_token, created_at, updated_at \
             FROM {table} WHERE TRUE"
        ));
        if let Some(user_id) = user_id {
            builder.push(" AND user_id = ").push_bind(user_id.to_owned());
        }
        if let Some(platform) = platform {
            builder.push(" AND platform = ").push_bind(platform.as_str());
        }
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        rows.iter().map(row_to_token).collect()
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/remind_test".to_string()),
            table_prefix: format!("test_{}_", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = PostgresReminderStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        remind_state::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }
}
