//! Single-use access tokens for ephemeral console sessions.
//!
//! Tokens are HS256-signed JWTs bound to one target resource. Each `jti` is
//! consumed at most once through a shared replay store, so a token accepted
//! by one instance is rejected by every other.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{
    AccessScope, AccessTokenClaims, DEFAULT_ACCESS_TOKEN_TTL_SECONDS, MAX_ACCESS_TOKEN_TTL_SECONDS,
};
use tracing::{info, warn};

mod signing;


/// Store that records consumed token ids.
#[async_trait]
pub trait AccessTokenReplayStore: Send + Sync {
    /// Marks `jti` consumed until `expires_at`.
    ///
    /// Returns `true` only for the first caller; every later call for the
    /// same `jti` returns `false`.
    async fn consume_once(&self, jti: &str, expires_at: DateTime<Utc>) -> AppResult<bool>;
}

/// Access token signing configuration.
#[derive(Clone)]
pub struct AccessTokenConfig {
    signing_key: Option<Vec<u8>>,
    default_ttl: Duration,
    max_ttl: Duration,
}

impl AccessTokenConfig {
    /// Creates a configuration; an empty key counts as missing.
    #[must_use]
    pub fn new(signing_key: Option<Vec<u8>>, default_ttl: Duration) -> Self {
        Self {
            signing_key: signing_key.filter(|key| !key.is_empty()),
            default_ttl,
            max_ttl: Duration::seconds(MAX_ACCESS_TOKEN_TTL_SECONDS),
        }
    }

    /// Replaces the longest lifetime a token may be issued with.
    #[must_use]
    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }

    /// Returns the default token lifetime.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the longest token lifetime.
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    fn signing_key(&self) -> AppResult<&[u8]> {
        self.signing_key
            .as_deref()
            .ok_or(AppError::SigningKeyMissing)
    }
}

impl Default for AccessTokenConfig {
    fn default() -> Self {
        Self::new(None, Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECONDS))
    }
}

impl std::fmt::Debug for AccessTokenConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AccessTokenConfig")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("default_ttl", &self.default_ttl)
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

/// Signed token returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAccessToken {
    /// Compact JWT.
    pub token: String,
    /// Claims embedded in the token.
    pub claims: AccessTokenClaims,
}

/// Issues and consumes single-use access tokens.
#[derive(Clone)]
pub struct AccessTokenService {
    config: AccessTokenConfig,
    replay_store: Arc<dyn AccessTokenReplayStore>,
}

impl AccessTokenService {
    /// Creates an access token service.
    #[must_use]
    pub fn new(config: AccessTokenConfig, replay_store: Arc<dyn AccessTokenReplayStore>) -> Self {
        Self {
            config,
            replay_store,
        }
    }

    /// Issues a token for `subject` bound to `target`.
    ///
    /// A missing or non-positive `ttl` uses the configured default; longer
    /// lifetimes are clamped to the configured maximum.
    pub fn issue(
        &self,
        subject: &str,
        target: &str,
        scope: AccessScope,
        ttl: Option<Duration>,
    ) -> AppResult<IssuedAccessToken> {
        let key = self.config.signing_key()?;
        let ttl = ttl
            .filter(|ttl| *ttl > Duration::zero())
            .unwrap_or(self.config.default_ttl)
            .min(self.config.max_ttl);
        let claims = AccessTokenClaims::new(subject, target, scope, Utc::now(), ttl)?;
        let token = signing::sign(&claims, key)?;

        info!(
            subject = %claims.sub,
            target = %claims.target,
            jti = %claims.jti,
            expires_at = claims.exp,
            "issued console access token"
        );

        Ok(IssuedAccessToken { token, claims })
    }

    /// Verifies `token`, checks its target and consumes its `jti`.
    pub async fn validate_and_consume(
        &self,
        token: &str,
        expected_target: &str,
    ) -> AppResult<AccessTokenClaims> {
        let key = self.config.signing_key()?;
        let claims = signing::verify(token, key)?;

        if claims.target != expected_target {
            warn!(
                jti = %claims.jti,
                target = %claims.target,
                expected_target,
                "access token presented for another target"
            );
            return Err(AppError::TokenTargetMismatch(format!(
                "token is bound to '{}', not '{expected_target}'",
                claims.target
            )));
        }

        let expires_at = claims.expires_at()?;
        if !self
            .replay_store
            .consume_once(claims.jti.as_str(), expires_at)
            .await?
        {
            warn!(jti = %claims.jti, subject = %claims.sub, "access token replayed");
            return Err(AppError::TokenReplayed);
        }

        Ok(claims)
    }
}
