use async_trait::async_trait;
use serde_json::Value;
use tollgate_core::AppResult;
use tollgate_domain::ResourceIdentity;

/// Port for the remote infrastructure API.
///
/// Every call carries an idempotency key derived from the event id so a
/// redelivered job repeats the same request. Implementations report
/// `Conflict` for a create of an existing resource, `NotFound` for a delete of
/// a missing one, and `External { retryable, .. }` for everything else that
/// failed.
#[async_trait]
pub trait InfrastructureClient: Send + Sync {
    /// Creates `identity` from `spec`.
    async fn create_resource(
        &self,
        identity: &ResourceIdentity,
        spec: &Value,
        idempotency_key: &str,
    ) -> AppResult<()>;

    /// Deletes `identity`.
    async fn delete_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()>;

    /// Powers `identity` on.
    async fn start_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()>;

    /// Powers `identity` off.
    async fn stop_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()>;

    /// Power cycles `identity`.
    async fn restart_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()>;
}
