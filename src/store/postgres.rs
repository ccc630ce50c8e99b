use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, Instrument, Span};

use super::{StoreError, UserCredentials, UserStore};
use crate::auth::{service::TelegramProfile, UserId};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Postgres-backed [`UserStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Split a schema file into executable statements, dropping comment-only chunks.
fn split_sql_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections.max(1))
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables and indexes.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        for statement in split_sql_statements(SCHEMA) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .instrument(db_span("DDL", "schema.sql"))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserId, StoreError> {
        let query = "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id";
        let result = sqlx::query(query)
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(row) => Ok(UserId::new(row.try_get("id")?)),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateEmail),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<UserCredentials, StoreError> {
        let query = "SELECT id, password_hash FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?
            .ok_or(StoreError::NotFound)?;

        let password_hash: Option<String> = row.try_get("password_hash")?;
        Ok(UserCredentials {
            user_id: UserId::new(row.try_get("id")?),
            password_hash: password_hash.ok_or(StoreError::NotFound)?,
        })
    }

    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user_id.get())
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_link_code(
        &self,
        code_digest: &[u8],
        user_id: UserId,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO telegram_link_codes (code_hash, user_id, expires_at)
            VALUES ($1, $2, to_timestamp($3::float8))
        ";
        sqlx::query(query)
            .bind(code_digest)
            .bind(user_id.get())
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn redeem_link_code(
        &self,
        code_digest: &[u8],
        now: i64,
        profile: &TelegramProfile,
    ) -> Result<UserId, StoreError> {
        // Dropping the transaction on an early return rolls it back, so the code survives.
        let mut tx = self.pool.begin().await?;

        let query = "SELECT 1 FROM telegram_accounts WHERE telegram_user_id = $1";
        let linked = sqlx::query(query)
            .bind(profile.telegram_user_id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await?;
        if linked.is_some() {
            return Err(StoreError::TelegramAlreadyLinked);
        }

        // Row lock: concurrent redeemers of the same code queue here.
        let query = r"
            SELECT user_id,
                   used_at IS NOT NULL AS used,
                   expires_at <= to_timestamp($2::float8) AS expired
            FROM telegram_link_codes
            WHERE code_hash = $1
            FOR UPDATE
        ";
        let row = sqlx::query(query)
            .bind(code_digest)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await?
            .ok_or(StoreError::LinkCodeNotFound)?;

        if row.try_get::<bool, _>("used")? {
            return Err(StoreError::LinkCodeUsed);
        }
        if row.try_get::<bool, _>("expired")? {
            return Err(StoreError::LinkCodeExpired);
        }
        let user_id = UserId::new(row.try_get("user_id")?);

        let query = r"
            INSERT INTO telegram_accounts
                (telegram_user_id, user_id, chat_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let result = sqlx::query(query)
            .bind(profile.telegram_user_id)
            .bind(user_id.get())
            .bind(profile.chat_id)
            .bind(profile.username.as_deref())
            .bind(profile.first_name.as_deref())
            .bind(profile.last_name.as_deref())
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await;
        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(StoreError::TelegramAlreadyLinked),
            Err(err) => return Err(err.into()),
        }

        let query = "UPDATE telegram_link_codes SET used_at = NOW() WHERE code_hash = $1";
        sqlx::query(query)
            .bind(code_digest)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await?;

        tx.commit().await?;
        Ok(user_id)
    }

    async fn find_by_telegram(&self, telegram_user_id: i64) -> Result<Option<UserId>, StoreError> {
        let query = "SELECT user_id FROM telegram_accounts WHERE telegram_user_id = $1";
        let row = sqlx::query(query)
            .bind(telegram_user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;

        row.map(|row| row.try_get("user_id").map(UserId::new))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn create_telegram_user(&self, profile: &TelegramProfile) -> Result<UserId, StoreError> {
        // Both rows or neither; a concurrent link for the same account rolls back the user.
        let mut tx = self.pool.begin().await?;

        let query = "INSERT INTO users DEFAULT VALUES RETURNING id";
        let row = sqlx::query(query)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await?;
        let user_id = UserId::new(row.try_get("id")?);

        let query = r"
            INSERT INTO telegram_accounts
                (telegram_user_id, user_id, chat_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let result = sqlx::query(query)
            .bind(profile.telegram_user_id)
            .bind(user_id.get())
            .bind(profile.chat_id)
            .bind(profile.username.as_deref())
            .bind(profile.first_name.as_deref())
            .bind(profile.last_name.as_deref())
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => {
                tx.commit().await?;
                Ok(user_id)
            }
            Err(err) if is_unique_violation(&err) => Err(StoreError::TelegramAlreadyLinked),
            Err(err) => Err(err.into()),
        }
    }
}
