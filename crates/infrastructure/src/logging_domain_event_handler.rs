use async_trait::async_trait;
use tollgate_application::DomainEventHandler;
use tollgate_core::AppResult;
use tollgate_domain::DomainEvent;
use tracing::info;

/// Handler that writes every delivered event to the log.
///
/// Registered by the worker for all event types so emitted outcomes are
/// visible even when no notification channel is wired.
#[derive(Debug, Clone, Default)]
pub struct LoggingDomainEventHandler;

impl LoggingDomainEventHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DomainEventHandler for LoggingDomainEventHandler {
    fn name(&self) -> &str {
        "event-log"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        info!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            aggregate_type = event.aggregate_type().as_str(),
            aggregate_id = event.aggregate_id(),
            created_by = event.created_by(),
            payload_bytes = event.payload().len(),
            "domain event delivered"
        );
        Ok(())
    }
}
