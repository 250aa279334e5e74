use std::env;

use tollgate_core::{AppError, AppResult};

/// Worker settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerConfig {
    pub(crate) database_url: String,
    pub(crate) infra_api_base_url: String,
    pub(crate) infra_api_token: Option<String>,
    pub(crate) worker_id: String,
    pub(crate) pool_size: usize,
    pub(crate) claim_limit: usize,
    pub(crate) lease_seconds: u32,
    pub(crate) poll_interval_ms: u64,
    pub(crate) max_attempts: u32,
    pub(crate) retry_backoff_seconds: u32,
    pub(crate) recovery_interval_seconds: u64,
    pub(crate) recovery_grace_seconds: u64,
}

impl WorkerConfig {
    /// Loads settings from process environment variables.
    pub(crate) fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let database_url = required_env(&lookup, "DATABASE_URL")?;
        let infra_api_base_url = required_env(&lookup, "INFRA_API_BASE_URL")?;
        let infra_api_token = optional_env(&lookup, "INFRA_API_TOKEN");
        let worker_id = optional_env(&lookup, "WORKER_ID")
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));

        let config = Self {
            database_url,
            infra_api_base_url,
            infra_api_token,
            worker_id,
            pool_size: parse_env(&lookup, "WORKER_POOL_SIZE", 4)?,
            claim_limit: parse_env(&lookup, "WORKER_CLAIM_LIMIT", 10)?,
            lease_seconds: parse_env(&lookup, "WORKER_LEASE_SECONDS", 60)?,
            poll_interval_ms: parse_env(&lookup, "WORKER_POLL_INTERVAL_MS", 1500)?,
            max_attempts: parse_env(&lookup, "WORKER_MAX_ATTEMPTS", 5)?,
            retry_backoff_seconds: parse_env(&lookup, "WORKER_RETRY_BACKOFF_SECONDS", 10)?,
            recovery_interval_seconds: parse_env(&lookup, "WORKER_RECOVERY_INTERVAL_SECONDS", 60)?,
            recovery_grace_seconds: parse_env(&lookup, "WORKER_RECOVERY_GRACE_SECONDS", 120)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        let counters = [
            ("WORKER_POOL_SIZE", self.pool_size == 0),
            ("WORKER_CLAIM_LIMIT", self.claim_limit == 0),
            ("WORKER_LEASE_SECONDS", self.lease_seconds == 0),
            ("WORKER_POLL_INTERVAL_MS", self.poll_interval_ms == 0),
            ("WORKER_MAX_ATTEMPTS", self.max_attempts == 0),
            ("WORKER_RETRY_BACKOFF_SECONDS", self.retry_backoff_seconds == 0),
            ("WORKER_RECOVERY_INTERVAL_SECONDS", self.recovery_interval_seconds == 0),
            ("WORKER_RECOVERY_GRACE_SECONDS", self.recovery_grace_seconds == 0),
        ];

        if let Some((name, _)) = counters.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(AppError::Validation(format!(
                "{name} must be greater than zero"
            )));
        }

        Ok(())
    }
}

fn required_env(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> AppResult<String> {
    optional_env(lookup, name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn optional_env(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(lookup, name) {
        Some(value) => value.parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
