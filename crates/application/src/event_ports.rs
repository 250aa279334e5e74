use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tollgate_core::AppResult;
use tollgate_domain::{
    AggregateType, DomainEvent, DomainEventId, DomainEventStatus, NewDomainEvent,
    StatusTransition,
};

/// Repository port for domain event intent records.
///
/// Payloads are immutable once written; only status and archive time change,
/// and both change through conditional updates.
#[async_trait]
pub trait DomainEventRepository: Send + Sync {
    /// Persists one new event in `pending` status.
    async fn record_event(&self, event: NewDomainEvent) -> AppResult<DomainEvent>;

    /// Returns one event by id.
    async fn find_event(&self, event_id: DomainEventId) -> AppResult<Option<DomainEvent>>;

    /// Lists events recorded for one aggregate, oldest first.
    async fn list_events_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> AppResult<Vec<DomainEvent>>;

    /// Moves an event to `status` when its current status is a legal predecessor.
    ///
    /// Returns [`StatusTransition::Skipped`] when another writer got there first.
    async fn set_event_status(
        &self,
        event_id: DomainEventId,
        status: DomainEventStatus,
    ) -> AppResult<StatusTransition>;

    /// Sets the archive time of a terminal, not yet archived event.
    async fn archive_event(
        &self,
        event_id: DomainEventId,
        archived_at: DateTime<Utc>,
    ) -> AppResult<StatusTransition>;
}
