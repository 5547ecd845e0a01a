//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    AccountRepo, AdmissionOutcome, CapacityRepo, CounterRepo, DeletionRepo, EmailSendRepo,
    OneTimeTokenRepo, RecoveryOutcome,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    AccountRepo
    + DeletionRepo
    + CapacityRepo
    + CounterRepo
    + OneTimeTokenRepo
    + EmailSendRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
///
/// Suitable for a single process. Concurrent schedulers in separate
/// processes should share a PostgreSQL store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Config(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(query_timeout_secs.unwrap_or(5).max(1)));

        Self::connect(opts).await
    }

    /// Create a private in-memory store. Data is lost when the store is dropped.
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(opts).await
    }

    async fn connect(opts: SqliteConnectOptions) -> MetadataResult<Self> {
        let pool = SqlitePoolOptions::new()
            // A single connection serialises writers, so the conditional
            // updates below never see "database is locked". It also keeps an
            // in-memory database alive for the life of the pool.
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::macros::format_description;
    use time::{Date, OffsetDateTime, UtcOffset};
    use uuid::Uuid;

    const CAPACITY_UPSERT: &str = r#"
        INSERT INTO deletion_capacity (day, count, max_limit, created_at, updated_at)
        VALUES (?, 1, ?, ?, ?)
        ON CONFLICT(day) DO UPDATE SET
            count = deletion_capacity.count + 1,
            updated_at = excluded.updated_at
        WHERE deletion_capacity.count < deletion_capacity.max_limit
          AND deletion_capacity.count < excluded.max_limit
        RETURNING count
    "#;

    /// Fixed-width UTC text for a timestamp column.
    ///
    /// SQLite compares these columns as text, so every stored value must
    /// have the same width and offset for `<` and `ORDER BY` to follow time.
    fn ts(at: OffsetDateTime) -> MetadataResult<String> {
        at.to_offset(UtcOffset::UTC)
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
            ))
            .map_err(|e| MetadataError::Internal(format!("cannot encode timestamp {at}: {e}")))
    }

    fn ts_opt(at: Option<OffsetDateTime>) -> MetadataResult<Option<String>> {
        at.map(ts).transpose()
    }

    fn check_limit(max_limit: i64) -> MetadataResult<()> {
        if max_limit < 1 {
            return Err(MetadataError::Constraint(format!(
                "capacity max_limit must be at least 1, got {max_limit}"
            )));
        }
        Ok(())
    }

    #[async_trait]
    impl AccountRepo for SqliteStore {
        async fn create_account(&self, account: &AccountRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO accounts (
                    user_id, email, display_name, created_at, updated_at, deleted_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(account.user_id)
            .bind(&account.email)
            .bind(&account.display_name)
            .bind(ts(account.created_at)?)
            .bind(ts(account.updated_at)?)
            .bind(ts_opt(account.deleted_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || format!("account {}", account.user_id))
            })?;
            Ok(())
        }

        async fn get_account(&self, user_id: Uuid) -> MetadataResult<Option<AccountRow>> {
            let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn soft_delete_account(
            &self,
            user_id: Uuid,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE accounts SET deleted_at = ?, updated_at = ? \
                 WHERE user_id = ? AND deleted_at IS NULL",
            )
            .bind(ts(at)?)
            .bind(ts(at)?)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn restore_account(&self, user_id: Uuid, at: OffsetDateTime) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE accounts SET deleted_at = NULL, updated_at = ? WHERE user_id = ?",
            )
            .bind(ts(at)?)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn hard_delete_account(&self, user_id: Uuid) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM one_time_tokens WHERE subject_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM accounts WHERE user_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl DeletionRepo for SqliteStore {
        async fn create_deletion(&self, deletion: &DeletionRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO user_deletions (
                    deletion_id, user_id, status, requested_at, grace_expires_at,
                    scheduled_date, recovery_token_hash, recovery_token_expires_at,
                    cancelled_at, executed_at, updated_at, execution_attempts
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(deletion.deletion_id)
            .bind(deletion.user_id)
            .bind(&deletion.status)
            .bind(ts(deletion.requested_at)?)
            .bind(ts(deletion.grace_expires_at)?)
            .bind(deletion.scheduled_date)
            .bind(&deletion.recovery_token_hash)
            .bind(ts_opt(deletion.recovery_token_expires_at)?)
            .bind(ts_opt(deletion.cancelled_at)?)
            .bind(ts_opt(deletion.executed_at)?)
            .bind(ts(deletion.updated_at)?)
            .bind(deletion.execution_attempts)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || {
                    format!("scheduled deletion for user {}", deletion.user_id)
                })
            })?;
            Ok(())
        }

        async fn get_deletion(&self, deletion_id: Uuid) -> MetadataResult<Option<DeletionRow>> {
            let row = sqlx::query_as::<_, DeletionRow>(
                "SELECT * FROM user_deletions WHERE deletion_id = ?",
            )
            .bind(deletion_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_active_deletion_for_user(
            &self,
            user_id: Uuid,
        ) -> MetadataResult<Option<DeletionRow>> {
            let row = sqlx::query_as::<_, DeletionRow>(
                "SELECT * FROM user_deletions WHERE user_id = ? AND status = 'scheduled'",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_grace_expired_deletions(
            &self,
            now: OffsetDateTime,
            limit: i64,
        ) -> MetadataResult<Vec<DeletionRow>> {
            let rows = sqlx::query_as::<_, DeletionRow>(
                r#"
                SELECT * FROM user_deletions
                WHERE status = 'scheduled'
                  AND scheduled_date IS NULL
                  AND grace_expires_at <= ?
                ORDER BY grace_expires_at, deletion_id
                LIMIT ?
                "#,
            )
            .bind(ts(now)?)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_due_deletions(
            &self,
            today: Date,
            limit: i64,
        ) -> MetadataResult<Vec<DeletionRow>> {
            let rows = sqlx::query_as::<_, DeletionRow>(
                r#"
                SELECT * FROM user_deletions
                WHERE status = 'scheduled'
                  AND scheduled_date IS NOT NULL
                  AND scheduled_date <= ?
                ORDER BY execution_attempts, scheduled_date, deletion_id
                LIMIT ?
                "#,
            )
            .bind(today)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn admit_deletion(
            &self,
            deletion_id: Uuid,
            day: Date,
            max_limit: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<AdmissionOutcome> {
            check_limit(max_limit)?;
            let mut tx = self.pool.begin().await?;

            let claimed = sqlx::query(
                r#"
                UPDATE user_deletions SET scheduled_date = ?, updated_at = ?
                WHERE deletion_id = ? AND status = 'scheduled' AND scheduled_date IS NULL
                "#,
            )
            .bind(day)
            .bind(ts(now)?)
            .bind(deletion_id)
            .execute(&mut *tx)
            .await?;

            if claimed.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(AdmissionOutcome::NotEligible);
            }

            let count: Option<i64> = sqlx::query_scalar(CAPACITY_UPSERT)
                .bind(day)
                .bind(max_limit)
                .bind(ts(now)?)
                .bind(ts(now)?)
                .fetch_optional(&mut *tx)
                .await?;

            match count {
                Some(count) => {
                    tx.commit().await?;
                    Ok(AdmissionOutcome::Admitted { count })
                }
                None => {
                    tx.rollback().await?;
                    Ok(AdmissionOutcome::DayFull)
                }
            }
        }

        async fn cancel_deletion(
            &self,
            deletion_id: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE user_deletions
                SET status = 'cancelled', cancelled_at = ?, updated_at = ?,
                    recovery_token_hash = NULL, recovery_token_expires_at = NULL
                WHERE deletion_id = ? AND status = 'scheduled'
                "#,
            )
            .bind(ts(now)?)
            .bind(ts(now)?)
            .bind(deletion_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn execute_deletion(
            &self,
            deletion_id: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let user_id: Option<Uuid> = sqlx::query_scalar(
                r#"
                UPDATE user_deletions
                SET status = 'executed', executed_at = ?, updated_at = ?,
                    recovery_token_hash = NULL, recovery_token_expires_at = NULL
                WHERE deletion_id = ? AND status = 'scheduled' AND scheduled_date IS NOT NULL
                RETURNING user_id
                "#,
            )
            .bind(ts(now)?)
            .bind(ts(now)?)
            .bind(deletion_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(user_id) = user_id else {
                tx.rollback().await?;
                return Ok(false);
            };

            sqlx::query("DELETE FROM one_time_tokens WHERE subject_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM accounts WHERE user_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(true)
        }

        async fn recover_deletion(
            &self,
            deletion_id: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<RecoveryOutcome> {
            let mut tx = self.pool.begin().await?;

            let user_id: Option<Uuid> = sqlx::query_scalar(
                r#"
                UPDATE user_deletions
                SET status = 'cancelled', cancelled_at = ?, updated_at = ?,
                    recovery_token_hash = NULL, recovery_token_expires_at = NULL
                WHERE deletion_id = ? AND status = 'scheduled'
                RETURNING user_id
                "#,
            )
            .bind(ts(now)?)
            .bind(ts(now)?)
            .bind(deletion_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(user_id) = user_id else {
                tx.rollback().await?;
                return Ok(RecoveryOutcome::NotEligible);
            };

            let restored = sqlx::query(
                "UPDATE accounts SET deleted_at = NULL, updated_at = ? WHERE user_id = ?",
            )
            .bind(ts(now)?)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            if restored.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(RecoveryOutcome::AccountMissing);
            }

            tx.commit().await?;
            Ok(RecoveryOutcome::Recovered)
        }

        async fn record_execution_failure(
            &self,
            deletion_id: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE user_deletions
                SET execution_attempts = execution_attempts + 1, updated_at = ?
                WHERE deletion_id = ? AND status = 'scheduled'
                "#,
            )
            .bind(ts(now)?)
            .bind(deletion_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn replace_recovery_token(
            &self,
            deletion_id: Uuid,
            token_hash: &str,
            expires_at: OffsetDateTime,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE user_deletions
                SET recovery_token_hash = ?, recovery_token_expires_at = ?, updated_at = ?
                WHERE deletion_id = ? AND status = 'scheduled'
                "#,
            )
            .bind(token_hash)
            .bind(ts(expires_at)?)
            .bind(ts(now)?)
            .bind(deletion_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    #[async_trait]
    impl CapacityRepo for SqliteStore {
        async fn get_capacity(&self, day: Date) -> MetadataResult<Option<DeletionCapacityRow>> {
            let row = sqlx::query_as::<_, DeletionCapacityRow>(
                "SELECT * FROM deletion_capacity WHERE day = ?",
            )
            .bind(day)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_capacity(
            &self,
            from: Date,
            to: Date,
        ) -> MetadataResult<Vec<DeletionCapacityRow>> {
            let rows = sqlx::query_as::<_, DeletionCapacityRow>(
                "SELECT * FROM deletion_capacity WHERE day >= ? AND day <= ? ORDER BY day",
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn try_increment_capacity(
            &self,
            day: Date,
            max_limit: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<Option<i64>> {
            check_limit(max_limit)?;
            let count: Option<i64> = sqlx::query_scalar(CAPACITY_UPSERT)
                .bind(day)
                .bind(max_limit)
                .bind(ts(now)?)
                .bind(ts(now)?)
                .fetch_optional(&self.pool)
                .await?;
            Ok(count)
        }
    }

    #[async_trait]
    impl CounterRepo for SqliteStore {
        async fn get_counter(&self, key: &str, now: OffsetDateTime) -> MetadataResult<i64> {
            let count: Option<i64> = sqlx::query_scalar(
                "SELECT count FROM rate_limit_counters WHERE counter_key = ? AND expires_at > ?",
            )
            .bind(key)
            .bind(ts(now)?)
            .fetch_optional(&self.pool)
            .await?;
            Ok(count.unwrap_or(0))
        }

        async fn increment_counter(
            &self,
            key: &str,
            expires_at: OffsetDateTime,
            now: OffsetDateTime,
        ) -> MetadataResult<i64> {
            let count: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO rate_limit_counters (counter_key, count, expires_at, updated_at)
                VALUES (?, 1, ?, ?)
                ON CONFLICT(counter_key) DO UPDATE SET
                    count = CASE
                        WHEN rate_limit_counters.expires_at <= excluded.updated_at THEN 1
                        ELSE rate_limit_counters.count + 1
                    END,
                    expires_at = CASE
                        WHEN rate_limit_counters.expires_at <= excluded.updated_at
                            THEN excluded.expires_at
                        ELSE rate_limit_counters.expires_at
                    END,
                    updated_at = excluded.updated_at
                RETURNING count
                "#,
            )
            .bind(key)
            .bind(ts(expires_at)?)
            .bind(ts(now)?)
            .fetch_one(&self.pool)
            .await?;
            Ok(count)
        }

        async fn purge_expired_counters(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at <= ?")
                .bind(ts(now)?)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl OneTimeTokenRepo for SqliteStore {
        async fn create_one_time_token(&self, token: &OneTimeTokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO one_time_tokens (token_hash, subject_id, purpose, created_at, expires_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&token.token_hash)
            .bind(token.subject_id)
            .bind(&token.purpose)
            .bind(ts(token.created_at)?)
            .bind(ts(token.expires_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, || "one-time token".to_string()))?;
            Ok(())
        }

        async fn peek_one_time_token(
            &self,
            token_hash: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<Option<OneTimeTokenRow>> {
            let row = sqlx::query_as::<_, OneTimeTokenRow>(
                "SELECT * FROM one_time_tokens WHERE token_hash = ? AND expires_at > ?",
            )
            .bind(token_hash)
            .bind(ts(now)?)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn consume_one_time_token(
            &self,
            token_hash: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<Option<OneTimeTokenRow>> {
            let row = sqlx::query_as::<_, OneTimeTokenRow>(
                r#"
                DELETE FROM one_time_tokens
                WHERE token_hash = ? AND expires_at > ?
                RETURNING token_hash, subject_id, purpose, created_at, expires_at
                "#,
            )
            .bind(token_hash)
            .bind(ts(now)?)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_one_time_tokens_for_subject(
            &self,
            subject_id: Uuid,
            purpose: &str,
        ) -> MetadataResult<u64> {
            let result =
                sqlx::query("DELETE FROM one_time_tokens WHERE subject_id = ? AND purpose = ?")
                    .bind(subject_id)
                    .bind(purpose)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected())
        }

        async fn purge_expired_one_time_tokens(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM one_time_tokens WHERE expires_at <= ?")
                .bind(ts(now)?)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl EmailSendRepo for SqliteStore {
        async fn record_email_send(&self, send: &EmailSendRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO email_sends (
                    send_id, recipient, subject, template, status, error_message, sent_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(send.send_id)
            .bind(&send.recipient)
            .bind(&send.subject)
            .bind(&send.template)
            .bind(&send.status)
            .bind(&send.error_message)
            .bind(ts(send.sent_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, || format!("email send {}", send.send_id)))?;
            Ok(())
        }

        async fn list_email_sends(
            &self,
            recipient: &str,
            limit: i64,
        ) -> MetadataResult<Vec<EmailSendRow>> {
            let rows = sqlx::query_as::<_, EmailSendRow>(
                r#"
                SELECT * FROM email_sends
                WHERE recipient = ?
                ORDER BY sent_at DESC, send_id
                LIMIT ?
                "#,
            )
            .bind(recipient)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Accounts; deleted_at is the soft-delete flag
CREATE TABLE IF NOT EXISTS accounts (
    user_id BLOB PRIMARY KEY,
    email TEXT NOT NULL,
    display_name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_accounts_deleted ON accounts(deleted_at) WHERE deleted_at IS NOT NULL;

-- Deletion lifecycle records (retained after execution for audit)
CREATE TABLE IF NOT EXISTS user_deletions (
    deletion_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled'
        CHECK (status IN ('scheduled', 'cancelled', 'executed')),
    requested_at TEXT NOT NULL,
    grace_expires_at TEXT NOT NULL,
    scheduled_date TEXT,
    recovery_token_hash TEXT,
    recovery_token_expires_at TEXT,
    cancelled_at TEXT,
    executed_at TEXT,
    updated_at TEXT NOT NULL,
    execution_attempts INTEGER NOT NULL DEFAULT 0
);
-- At most one scheduled record per user
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_deletions_active_user
    ON user_deletions(user_id) WHERE status = 'scheduled';
CREATE INDEX IF NOT EXISTS idx_user_deletions_grace
    ON user_deletions(grace_expires_at) WHERE status = 'scheduled' AND scheduled_date IS NULL;
CREATE INDEX IF NOT EXISTS idx_user_deletions_due
    ON user_deletions(execution_attempts, scheduled_date) WHERE status = 'scheduled' AND scheduled_date IS NOT NULL;

-- Permanent deletions admitted per UTC day
CREATE TABLE IF NOT EXISTS deletion_capacity (
    day TEXT PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0,
    max_limit INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (max_limit >= 1),
    CHECK (count >= 0 AND count <= max_limit)
);

-- Notification rate limit counters
CREATE TABLE IF NOT EXISTS rate_limit_counters (
    counter_key TEXT PRIMARY KEY,
    count INTEGER NOT NULL,
    expires_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rate_limit_counters_expires ON rate_limit_counters(expires_at);

-- Hashed one-time tokens
CREATE TABLE IF NOT EXISTS one_time_tokens (
    token_hash TEXT PRIMARY KEY,
    subject_id BLOB NOT NULL,
    purpose TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_one_time_tokens_subject ON one_time_tokens(subject_id, purpose);
CREATE INDEX IF NOT EXISTS idx_one_time_tokens_expires ON one_time_tokens(expires_at);

-- Attempted notification emails
CREATE TABLE IF NOT EXISTS email_sends (
    send_id BLOB PRIMARY KEY,
    recipient TEXT NOT NULL,
    subject TEXT NOT NULL,
    template TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('sent', 'failed')),
    error_message TEXT,
    sent_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_email_sends_recipient ON email_sends(recipient, sent_at);
"#;
