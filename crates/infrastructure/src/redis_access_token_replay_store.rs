//! Redis-backed replay store for single-use access tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tollgate_application::AccessTokenReplayStore;
use tollgate_core::{AppError, AppResult};

/// Redis implementation of the access token replay store.
///
/// Keys expire together with the token, so Redis never needs a purge pass.
#[derive(Clone)]
pub struct RedisAccessTokenReplayStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisAccessTokenReplayStore {
    /// Creates a replay store with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, jti: &str) -> String {
        format!("{}:{jti}", self.key_prefix)
    }
}

/// Seconds until `expires_at`, at least one.
fn ttl_seconds(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((expires_at - now).num_seconds())
        .unwrap_or(0)
        .max(1)
}

#[async_trait]
impl AccessTokenReplayStore for RedisAccessTokenReplayStore {
    async fn consume_once(&self, jti: &str, expires_at: DateTime<Utc>) -> AppResult<bool> {
        if jti.trim().is_empty() {
            return Err(AppError::Validation(
                "access token jti must not be empty".to_owned(),
            ));
        }

        let key = self.key_for(jti);
        let ttl = ttl_seconds(expires_at, Utc::now());

        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))?;

        let stored: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to consume access token '{jti}' in redis: {error}"
                ))
            })?;

        Ok(stored.is_some())
    }
}
