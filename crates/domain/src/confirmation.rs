use serde::{Deserialize, Serialize};
use tollgate_core::{AppError, AppResult};

/// Environment class governing how a delete must be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentClass {
    /// Test environments accept a boolean confirmation.
    Test,
    /// Production environments require the exact resource name.
    Production,
}

impl EnvironmentClass {
    /// Parses an environment class, rejecting unknown values.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(AppError::UnsupportedEnvironment(format!(
                "environment '{value}' has no delete confirmation policy"
            ))),
        }
    }

    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Production => "prod",
        }
    }
}

/// Confirmation supplied by the caller of a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteConfirmation {
    /// Boolean acknowledgement.
    pub confirm: Option<bool>,
    /// Typed resource name.
    pub confirm_name: Option<String>,
}

impl DeleteConfirmation {
    /// Boolean-only confirmation.
    #[must_use]
    pub fn confirmed() -> Self {
        Self {
            confirm: Some(true),
            confirm_name: None,
        }
    }

    /// Name-only confirmation.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            confirm: None,
            confirm_name: Some(name.into()),
        }
    }
}

/// Checks a delete confirmation against the environment's policy.
///
/// Test environments need `confirm = true`. Production environments need
/// `confirm_name` equal to `resource_name`; a missing name and a wrong name
/// fail with different error codes.
pub fn validate_delete_confirmation(
    environment: &str,
    resource_name: &str,
    confirmation: &DeleteConfirmation,
) -> AppResult<()> {
    match EnvironmentClass::parse(environment)? {
        EnvironmentClass::Test => {
            if confirmation.confirm == Some(true) {
                Ok(())
            } else {
                Err(AppError::ConfirmationRequired(format!(
                    "deleting '{resource_name}' in a test environment requires confirm=true"
                )))
            }
        }
        EnvironmentClass::Production => match confirmation.confirm_name.as_deref() {
            None => Err(AppError::ConfirmationRequired(format!(
                "deleting '{resource_name}' in production requires typing the resource name"
            ))),
            Some(name) if name.trim().is_empty() => Err(AppError::ConfirmationRequired(format!(
                "deleting '{resource_name}' in production requires typing the resource name"
            ))),
            Some(name) if name == resource_name => Ok(()),
            Some(name) => Err(AppError::ConfirmationMismatch(format!(
                "confirmation '{name}' does not match resource '{resource_name}'"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{DeleteConfirmation, validate_delete_confirmation};

    fn code(result: tollgate_core::AppResult<()>) -> &'static str {
        match result {
            Ok(()) => "ok",
            Err(error) => error.code(),
        }
    }

    #[test]
    fn test_environment_accepts_boolean_confirmation() {
        let result = validate_delete_confirmation("test", "vm-1", &DeleteConfirmation::confirmed());
        assert_eq!(code(result), "ok");
    }

    #[test]
    fn test_environment_rejects_name_without_boolean() {
        let result = validate_delete_confirmation("test", "vm-1", &DeleteConfirmation::named("vm-1"));
        assert_eq!(code(result), "confirmation_required");
    }

    #[test]
    fn production_rejects_boolean_without_name() {
        let result = validate_delete_confirmation("prod", "vm-1", &DeleteConfirmation::confirmed());
        assert_eq!(code(result), "confirmation_required");
    }

    #[test]
    fn production_accepts_exact_name() {
        let result = validate_delete_confirmation("prod", "vm-1", &DeleteConfirmation::named("vm-1"));
        assert_eq!(code(result), "ok");
    }

    #[test]
    fn production_rejects_wrong_name_with_mismatch() {
        let confirmation = DeleteConfirmation {
            confirm: Some(true),
            confirm_name: Some("vm-2".to_owned()),
        };
        let result = validate_delete_confirmation("production", "vm-1", &confirmation);
        assert_eq!(code(result), "confirmation_mismatch");
    }

    #[test]
    fn unknown_environment_always_fails() {
        for confirmation in [
            DeleteConfirmation::confirmed(),
            DeleteConfirmation::named("vm-1"),
            DeleteConfirmation::default(),
        ] {
            let result = validate_delete_confirmation("staging", "vm-1", &confirmation);
            assert_eq!(code(result), "unsupported_environment");
        }
    }
}
