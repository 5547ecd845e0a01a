//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{
    AccountRepo, AdmissionOutcome, CapacityRepo, CounterRepo, DeletionRepo, EmailSendRepo,
    OneTimeTokenRepo, RecoveryOutcome,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use sunset_core::config::PgSslMode;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

const CAPACITY_UPSERT: &str = r#"
    INSERT INTO deletion_capacity (day, count, max_limit, created_at, updated_at)
    VALUES ($1, 1, $2, $3, $3)
    ON CONFLICT (day) DO UPDATE SET
        count = deletion_capacity.count + 1,
        updated_at = EXCLUDED.updated_at
    WHERE deletion_capacity.count < deletion_capacity.max_limit
      AND deletion_capacity.count < EXCLUDED.max_limit
    RETURNING count
"#;

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

fn check_limit(max_limit: i64) -> MetadataResult<()> {
    if max_limit < 1 {
        return Err(MetadataError::Constraint(format!(
            "capacity max_limit must be at least 1, got {max_limit}"
        )));
    }
    Ok(())
}

/// PostgreSQL-based metadata store.
///
/// Safe to share between processes: every ledger and counter mutation is a
/// single conditional statement.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from its own environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!(
                statement_timeout_ms = timeout_ms,
                "PostgreSQL statement_timeout configured"
            );
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AccountRepo for PostgresStore {
    async fn create_account(&self, account: &AccountRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                user_id, email, display_name, created_at, updated_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.user_id)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(account.created_at)
        .bind(account.updated_at)
        .bind(account.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MetadataError::from_insert(e, || format!("account {}", account.user_id)))?;
        Ok(())
    }

    async fn get_account(&self, user_id: Uuid) -> MetadataResult<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn soft_delete_account(&self, user_id: Uuid, at: OffsetDateTime) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET deleted_at = $1, updated_at = $1 \
             WHERE user_id = $2 AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn restore_account(&self, user_id: Uuid, at: OffsetDateTime) -> MetadataResult<bool> {
        let result =
            sqlx::query("UPDATE accounts SET deleted_at = NULL, updated_at = $1 WHERE user_id = $2")
                .bind(at)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hard_delete_account(&self, user_id: Uuid) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM one_time_tokens WHERE subject_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DeletionRepo for PostgresStore {
    async fn create_deletion(&self, deletion: &DeletionRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_deletions (
                deletion_id, user_id, status, requested_at, grace_expires_at,
                scheduled_date, recovery_token_hash, recovery_token_expires_at,
                cancelled_at, executed_at, updated_at, execution_attempts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(deletion.deletion_id)
        .bind(deletion.user_id)
        .bind(&deletion.status)
        .bind(deletion.requested_at)
        .bind(deletion.grace_expires_at)
        .bind(deletion.scheduled_date)
        .bind(&deletion.recovery_token_hash)
        .bind(deletion.recovery_token_expires_at)
        .bind(deletion.cancelled_at)
        .bind(deletion.executed_at)
        .bind(deletion.updated_at)
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
        let row =
            sqlx::query_as::<_, DeletionRow>("SELECT * FROM user_deletions WHERE deletion_id = $1")
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
            "SELECT * FROM user_deletions WHERE user_id = $1 AND status = 'scheduled'",
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
              AND grace_expires_at <= $1
            ORDER BY grace_expires_at, deletion_id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_due_deletions(&self, today: Date, limit: i64) -> MetadataResult<Vec<DeletionRow>> {
        let rows = sqlx::query_as::<_, DeletionRow>(
            r#"
            SELECT * FROM user_deletions
            WHERE status = 'scheduled'
              AND scheduled_date IS NOT NULL
              AND scheduled_date <= $1
            ORDER BY execution_attempts, scheduled_date, deletion_id
            LIMIT $2
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

        // Row lock on the record: a concurrent scheduler blocks here and then
        // re-evaluates `scheduled_date IS NULL` against the committed row.
        let claimed = sqlx::query(
            r#"
            UPDATE user_deletions SET scheduled_date = $1, updated_at = $2
            WHERE deletion_id = $3 AND status = 'scheduled' AND scheduled_date IS NULL
            "#,
        )
        .bind(day)
        .bind(now)
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
            .bind(now)
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

    async fn cancel_deletion(&self, deletion_id: Uuid, now: OffsetDateTime) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_deletions
            SET status = 'cancelled', cancelled_at = $1, updated_at = $1,
                recovery_token_hash = NULL, recovery_token_expires_at = NULL
            WHERE deletion_id = $2 AND status = 'scheduled'
            "#,
        )
        .bind(now)
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

        // Holds the record's row lock until commit, so a concurrent recovery
        // waits and then finds the record executed.
        let user_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE user_deletions
            SET status = 'executed', executed_at = $1, updated_at = $1,
                recovery_token_hash = NULL, recovery_token_expires_at = NULL
            WHERE deletion_id = $2 AND status = 'scheduled' AND scheduled_date IS NOT NULL
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(deletion_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("DELETE FROM one_time_tokens WHERE subject_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM accounts WHERE user_id = $1")
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
            SET status = 'cancelled', cancelled_at = $1, updated_at = $1,
                recovery_token_hash = NULL, recovery_token_expires_at = NULL
            WHERE deletion_id = $2 AND status = 'scheduled'
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(deletion_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            tx.rollback().await?;
            return Ok(RecoveryOutcome::NotEligible);
        };

        let restored =
            sqlx::query("UPDATE accounts SET deleted_at = NULL, updated_at = $1 WHERE user_id = $2")
                .bind(now)
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
            SET execution_attempts = execution_attempts + 1, updated_at = $1
            WHERE deletion_id = $2 AND status = 'scheduled'
            "#,
        )
        .bind(now)
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
            SET recovery_token_hash = $1, recovery_token_expires_at = $2, updated_at = $3
            WHERE deletion_id = $4 AND status = 'scheduled'
            "#,
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(now)
        .bind(deletion_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CapacityRepo for PostgresStore {
    async fn get_capacity(&self, day: Date) -> MetadataResult<Option<DeletionCapacityRow>> {
        let row = sqlx::query_as::<_, DeletionCapacityRow>(
            "SELECT * FROM deletion_capacity WHERE day = $1",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_capacity(&self, from: Date, to: Date) -> MetadataResult<Vec<DeletionCapacityRow>> {
        let rows = sqlx::query_as::<_, DeletionCapacityRow>(
            "SELECT * FROM deletion_capacity WHERE day BETWEEN $1 AND $2 ORDER BY day",
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
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl CounterRepo for PostgresStore {
    async fn get_counter(&self, key: &str, now: OffsetDateTime) -> MetadataResult<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM rate_limit_counters WHERE counter_key = $1 AND expires_at > $2",
        )
        .bind(key)
        .bind(now)
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
            VALUES ($1, 1, $2, $3)
            ON CONFLICT (counter_key) DO UPDATE SET
                count = CASE
                    WHEN rate_limit_counters.expires_at <= EXCLUDED.updated_at THEN 1
                    ELSE rate_limit_counters.count + 1
                END,
                expires_at = CASE
                    WHEN rate_limit_counters.expires_at <= EXCLUDED.updated_at
                        THEN EXCLUDED.expires_at
                    ELSE rate_limit_counters.expires_at
                END,
                updated_at = EXCLUDED.updated_at
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn purge_expired_counters(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OneTimeTokenRepo for PostgresStore {
    async fn create_one_time_token(&self, token: &OneTimeTokenRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO one_time_tokens (token_hash, subject_id, purpose, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.subject_id)
        .bind(&token.purpose)
        .bind(token.created_at)
        .bind(token.expires_at)
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
            "SELECT * FROM one_time_tokens WHERE token_hash = $1 AND expires_at > $2",
        )
        .bind(token_hash)
        .bind(now)
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
            WHERE token_hash = $1 AND expires_at > $2
            RETURNING token_hash, subject_id, purpose, created_at, expires_at
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_one_time_tokens_for_subject(
        &self,
        subject_id: Uuid,
        purpose: &str,
    ) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM one_time_tokens WHERE subject_id = $1 AND purpose = $2")
            .bind(subject_id)
            .bind(purpose)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_one_time_tokens(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM one_time_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EmailSendRepo for PostgresStore {
    async fn record_email_send(&self, send: &EmailSendRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO email_sends (
                send_id, recipient, subject, template, status, error_message, sent_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(send.send_id)
        .bind(&send.recipient)
        .bind(&send.subject)
        .bind(&send.template)
        .bind(&send.status)
        .bind(&send.error_message)
        .bind(send.sent_at)
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
            WHERE recipient = $1
            ORDER BY sent_at DESC, send_id
            LIMIT $2
            "#,
        )
        .bind(recipient)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
