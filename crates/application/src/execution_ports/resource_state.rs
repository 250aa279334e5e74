use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tollgate_core::AppResult;
use tollgate_domain::{DomainEventId, ResourceIdentity, ResourceState};

/// Last known state of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStateRecord {
    /// Resource address.
    pub identity: ResourceIdentity,
    /// Current state.
    pub state: ResourceState,
    /// Event that last changed the state.
    pub last_event_id: DomainEventId,
    /// Update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Repository port for downstream resource state.
#[async_trait]
pub trait ResourceStateRepository: Send + Sync {
    /// Inserts or replaces the state row for `record.identity`.
    async fn record_resource_state(&self, record: ResourceStateRecord) -> AppResult<()>;

    /// Returns the state row for one resource.
    async fn find_resource_state(
        &self,
        identity: &ResourceIdentity,
    ) -> AppResult<Option<ResourceStateRecord>>;
}
