use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tollgate_application::AccessTokenReplayStore;
use tollgate_core::{AppError, AppResult};

/// PostgreSQL replay store for single-use access tokens.
///
/// The primary key on `jti` makes the first insert win across every process
/// sharing the database.
#[derive(Clone)]
pub struct PostgresAccessTokenReplayStore {
    pool: PgPool,
}

impl PostgresAccessTokenReplayStore {
    /// Creates a replay store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes consumed token ids whose expiry is before `before`.
    pub async fn purge_expired(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM consumed_access_tokens
            WHERE expires_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to purge consumed access tokens: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AccessTokenReplayStore for PostgresAccessTokenReplayStore {
    async fn consume_once(&self, jti: &str, expires_at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO consumed_access_tokens (jti, expires_at, consumed_at)
            VALUES ($1, $2, now())
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to consume access token '{jti}': {error}"))
        })?;

        Ok(result.rows_affected() == 1)
    }
}
