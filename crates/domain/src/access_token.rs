use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tollgate_core::{AppError, AppResult, NonEmptyString};
use uuid::Uuid;

/// Default lifetime of a console access token.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 2 * 60 * 60;

/// Longest lifetime a console access token may be issued with.
pub const MAX_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Cluster and namespace a token is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessScope {
    /// Cluster hosting the target resource.
    pub cluster: String,
    /// Namespace hosting the target resource.
    pub namespace: String,
}

/// Claims of a single-use console access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject the token was issued to.
    pub sub: String,
    /// Target resource id the token is bound to.
    pub target: String,
    /// Scope of the target resource.
    pub scope: AccessScope,
    /// Expiry as Unix seconds.
    pub exp: i64,
    /// Issue time as Unix seconds.
    pub iat: i64,
    /// Unique token identifier, consumed at most once.
    pub jti: String,
    /// Always true for console tokens.
    pub single_use: bool,
}

impl AccessTokenClaims {
    /// Builds claims for a fresh token.
    ///
    /// A `ttl` of zero or less falls back to the default lifetime.
    pub fn new(
        subject: &str,
        target: &str,
        scope: AccessScope,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<Self> {
        let subject = NonEmptyString::new(subject)
            .map_err(|_| AppError::Validation("access token subject is required".to_owned()))?;
        let target = NonEmptyString::new(target)
            .map_err(|_| AppError::Validation("access token target is required".to_owned()))?;

        if scope.cluster.trim().is_empty() || scope.namespace.trim().is_empty() {
            return Err(AppError::Validation(
                "access token scope requires cluster and namespace".to_owned(),
            ));
        }

        let ttl = if ttl <= Duration::zero() {
            Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECONDS)
        } else {
            ttl
        };

        let expires_at = issued_at.checked_add_signed(ttl).ok_or_else(|| {
            AppError::Validation(format!("access token ttl of {ttl} is out of range"))
        })?;

        Ok(Self {
            sub: subject.into(),
            target: target.into(),
            scope,
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            single_use: true,
        })
    }

    /// Returns the expiry as a timestamp.
    pub fn expires_at(&self) -> AppResult<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single().ok_or_else(|| {
            AppError::Validation(format!("invalid access token expiry '{}'", self.exp))
        })
    }
}
