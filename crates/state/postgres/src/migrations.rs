use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating the reminders and device token tables
/// and the indexes that back the scheduler's hot paths.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let reminders = config.reminders_table();
    let tokens = config.device_tokens_table();
    let prefix = &config.table_prefix;

    let create_reminders = format!(
        "CREATE TABLE IF NOT EXISTS {reminders} (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            reminder_type TEXT NOT NULL,
            title TEXT,
            message TEXT,
            payload JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            reminder_time TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL DEFAULT 'Pending',
            external_id TEXT,
            recurrence_pattern JSONB,
            is_recurring BOOLEAN NOT NULL DEFAULT FALSE,
            parent_reminder_id UUID,
            occurrence_number INTEGER,
            is_generated BOOLEAN NOT NULL DEFAULT FALSE,
            start_date TIMESTAMPTZ,
            end_date TIMESTAMPTZ,
            max_occurrences INTEGER,
            timezone TEXT,
            last_occurrence TIMESTAMPTZ,
            next_occurrence TIMESTAMPTZ,
            occurrence_count INTEGER NOT NULL DEFAULT 0,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"
    );

    let create_tokens = format!(
        "CREATE TABLE IF NOT EXISTS {tokens} (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            fcm_token TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"
    );

    // Dispatch scan.
    let idx_status_time = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}reminders_status_time_idx \
         ON {reminders} (status, reminder_time)"
    );
    // User listing.
    let idx_user_time = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}reminders_user_time_idx \
         ON {reminders} (user_id, reminder_time)"
    );
    // Expansion scan.
    let idx_recurring_active = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}reminders_recurring_active_idx \
         ON {reminders} (is_recurring, is_active)"
    );
    let idx_next_occurrence = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}reminders_next_occurrence_idx \
         ON {reminders} (next_occurrence)"
    );
    // Occurrence lookup.
    let idx_parent = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}reminders_parent_idx \
         ON {reminders} (parent_reminder_id)"
    );
    // Idempotency.
    let idx_external_id = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {prefix}reminders_external_id_idx \
         ON {reminders} (external_id) WHERE external_id IS NOT NULL"
    );
    let idx_token_user_platform = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}device_tokens_user_platform_idx \
         ON {tokens} (user_id, platform)"
    );

    sqlx::query(&create_reminders).execute(pool).await?;
    sqlx::query(&create_tokens).execute(pool).await?;
    sqlx::query(&idx_status_time).execute(pool).await?;
    sqlx::query(&idx_user_time).execute(pool).await?;
    sqlx::query(&idx_recurring_active).execute(pool).await?;
    sqlx::query(&idx_next_occurrence).execute(pool).await?;
    sqlx::query(&idx_parent).execute(pool).await?;
    sqlx::query(&idx_external_id).execute(pool).await?;
    sqlx::query(&idx_token_user_platform).execute(pool).await?;

    Ok(())
}
