//! Store, user and login-attempt persistence.
//!
//! Two seams: `AccountStore` (stores, users, daily reset bookkeeping) and
//! `AttemptLedger` (the `login_attempts` table that backs rate limiting).
//! `PgStore` implements both against Postgres; `MemoryStore` implements both
//! in-process for tests and local runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Connection, PgPool, Row};
use tracing::{Instrument, info_span};

/// How failed attempts are grouped when counting and clearing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptScope {
    /// Rows matching the username, or the client IP when one is known.
    UserOrIp,
    /// Rows matching both the username and the client IP.
    UserAndIp,
}

/// Active store resolved by its login code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreRecord {
    pub id: i64,
    pub store_code: String,
    pub store_name: String,
    /// Local hour at which the business day ends.
    pub eod_cutoff_hour: i32,
}

/// Active user inside a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub store_id: i64,
    pub username: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub id: i64,
    pub username: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
pub struct NewAttempt<'a> {
    pub username: &'a str,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub success: bool,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Active, non-deleted store by code.
    async fn find_store(&self, store_code: &str) -> Result<Option<StoreRecord>>;
    /// Active, non-deleted user by username within a store.
    async fn find_user(&self, store_id: i64, username: &str) -> Result<Option<UserRecord>>;
    async fn touch_last_login(&self, user_id: i64) -> Result<()>;
    /// Business date of the last availability reset for a store.
    async fn last_daily_reset(&self, store_id: i64) -> Result<Option<NaiveDate>>;
    /// Clear the store's availability rows and record `business_date` as reset.
    /// Returns how many availability rows were removed.
    async fn apply_daily_reset(&self, store_id: i64, business_date: NaiveDate) -> Result<u64>;
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait AttemptLedger: Send + Sync {
    async fn count_failures(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        since: DateTime<Utc>,
    ) -> Result<i64>;
    async fn record_attempt(&self, attempt: NewAttempt<'_>) -> Result<()>;
    /// Delete rows in scope; with `failures_only` successful rows are kept.
    async fn clear_attempts(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        failures_only: bool,
    ) -> Result<u64>;
    /// Delete every failed attempt for a username, from any address.
    async fn clear_user_failures(&self, username: &str) -> Result<u64>;
    /// Most recent attempts first.
    async fn recent_attempts(&self, username: Option<&str>, limit: i64) -> Result<Vec<AttemptRecord>>;
}

/// Postgres-backed account store and attempt ledger.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_store(&self, store_code: &str) -> Result<Option<StoreRecord>> {
        let query = r"
            SELECT id, store_code, store_name, eod_cutoff_hour
            FROM kds_stores
            WHERE store_code = $1 AND is_active = TRUE AND deleted_at IS NULL
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(store_code)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup store")?;

        Ok(row.map(|row| StoreRecord {
            id: row.get("id"),
            store_code: row.get("store_code"),
            store_name: row.get("store_name"),
            eod_cutoff_hour: row.get("eod_cutoff_hour"),
        }))
    }

    async fn find_user(&self, store_id: i64, username: &str) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT id, store_id, username, password_hash, display_name, role
            FROM kds_users
            WHERE store_id = $1 AND username = $2 AND is_active = TRUE AND deleted_at IS NULL
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(store_id)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user")?;

        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            store_id: row.get("store_id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            display_name: row.get("display_name"),
            role: row.get("role"),
        }))
    }

    async fn touch_last_login(&self, user_id: i64) -> Result<()> {
        let query = "UPDATE kds_users SET last_login_at = NOW() WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update last login")?;
        Ok(())
    }

    async fn last_daily_reset(&self, store_id: i64) -> Result<Option<NaiveDate>> {
        let query = "SELECT last_reset_date FROM pos_daily_tracking WHERE store_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(store_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read daily tracking")?;
        Ok(row.and_then(|row| row.get::<Option<NaiveDate>, _>("last_reset_date")))
    }

    async fn apply_daily_reset(&self, store_id: i64, business_date: NaiveDate) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin daily reset transaction")?;

        let query = "DELETE FROM pos_product_availability WHERE store_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let cleared = sqlx::query(query)
            .bind(store_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to clear product availability")?
            .rows_affected();

        let query = r"
            INSERT INTO pos_daily_tracking (store_id, last_reset_date, sold_out_state_snapshot, updated_at)
            VALUES ($1, $2, NULL, NOW())
            ON CONFLICT (store_id) DO UPDATE
            SET last_reset_date = EXCLUDED.last_reset_date,
                sold_out_state_snapshot = NULL,
                updated_at = NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(store_id)
            .bind(business_date)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to update daily tracking")?;

        tx.commit().await.context("commit daily reset transaction")?;
        Ok(cleared)
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}

#[async_trait]
impl AttemptLedger for PgStore {
    async fn count_failures(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let query = match scope {
            AttemptScope::UserOrIp => {
                r"
                SELECT COUNT(*) FROM login_attempts
                WHERE success = FALSE AND attempted_at > $3
                  AND (username = $1 OR ($2::text IS NOT NULL AND ip_address = $2))
                "
            }
            AttemptScope::UserAndIp => {
                r"
                SELECT COUNT(*) FROM login_attempts
                WHERE success = FALSE AND attempted_at > $3
                  AND username = $1 AND ip_address IS NOT DISTINCT FROM $2
                "
            }
        };
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .bind(ip)
            .bind(since)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count login attempts")?;
        Ok(row.get(0))
    }

    async fn record_attempt(&self, attempt: NewAttempt<'_>) -> Result<()> {
        let query = r"
            INSERT INTO login_attempts (username, ip_address, user_agent, success, attempted_at)
            VALUES ($1, $2, $3, $4, NOW())
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(attempt.username)
            .bind(attempt.ip)
            .bind(attempt.user_agent)
            .bind(attempt.success)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login attempt")?;
        Ok(())
    }

    async fn clear_attempts(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        failures_only: bool,
    ) -> Result<u64> {
        let query = match scope {
            AttemptScope::UserOrIp => {
                r"
                DELETE FROM login_attempts
                WHERE (NOT $3 OR success = FALSE)
                  AND (username = $1 OR ($2::text IS NOT NULL AND ip_address = $2))
                "
            }
            AttemptScope::UserAndIp => {
                r"
                DELETE FROM login_attempts
                WHERE (NOT $3 OR success = FALSE)
                  AND username = $1 AND ip_address IS NOT DISTINCT FROM $2
                "
            }
        };
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(username)
            .bind(ip)
            .bind(failures_only)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear login attempts")?;
        Ok(result.rows_affected())
    }

    async fn clear_user_failures(&self, username: &str) -> Result<u64> {
        let query = "DELETE FROM login_attempts WHERE username = $1 AND success = FALSE";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(username)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear failed login attempts")?;
        Ok(result.rows_affected())
    }

    async fn recent_attempts(&self, username: Option<&str>, limit: i64) -> Result<Vec<AttemptRecord>> {
        let query = r"
            SELECT id, username, ip_address, user_agent, success, attempted_at
            FROM login_attempts
            WHERE ($1::text IS NULL OR username = $1)
            ORDER BY attempted_at DESC, id DESC
            LIMIT $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(username)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list login attempts")?;

        Ok(rows
            .into_iter()
            .map(|row| AttemptRecord {
                id: row.get("id"),
                username: row.get("username"),
                ip_address: row.get("ip_address"),
                user_agent: row.get("user_agent"),
                success: row.get("success"),
                attempted_at: row.get("attempted_at"),
            })
            .collect())
    }
}
