use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{DomainEvent, DomainEventType};
use tracing::warn;

/// Listener for delivered domain events.
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles one event.
    async fn handle(&self, event: &DomainEvent) -> AppResult<()>;
}

struct FnHandler<F> {
    name: String,
    handler: F,
}

#[async_trait]
impl<F, Fut> DomainEventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync,
    Fut: Future<Output = AppResult<()>> + Send,
{
    fn name(&self) -> &str {
        self.name.as_str()
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        (self.handler)(event.clone()).await
    }
}

type HandlerRegistry = HashMap<DomainEventType, Vec<Arc<dyn DomainEventHandler>>>;

/// Synchronous best-effort fan-out of domain events to registered handlers.
///
/// One instance per process, shared through `Arc`. Handlers run one after
/// another in registration order; the registry lock is only held while the
/// handler list is copied.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HandlerRegistry>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for one event type.
    pub fn register(
        &self,
        event_type: DomainEventType,
        handler: Arc<dyn DomainEventHandler>,
    ) -> AppResult<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| AppError::Internal("event handler registry is poisoned".to_owned()))?;
        handlers.entry(event_type).or_default().push(handler);
        Ok(())
    }

    /// Registers a closure for one event type.
    pub fn register_fn<F, Fut>(
        &self,
        event_type: DomainEventType,
        name: impl Into<String>,
        handler: F,
    ) -> AppResult<()>
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.register(
            event_type,
            Arc::new(FnHandler {
                name: name.into(),
                handler,
            }),
        )
    }

    /// Returns how many handlers are registered for `event_type`.
    pub fn handler_count(&self, event_type: DomainEventType) -> AppResult<usize> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| AppError::Internal("event handler registry is poisoned".to_owned()))?;
        Ok(handlers.get(&event_type).map_or(0, Vec::len))
    }

    /// Delivers `event` to every handler registered for its type.
    ///
    /// A failing handler does not stop delivery to the rest. The first
    /// failure is returned once every handler ran.
    pub async fn dispatch(&self, event: &DomainEvent) -> AppResult<()> {
        let handlers = self.snapshot(event.event_type())?;

        if handlers.is_empty() {
            warn!(
                event_id = %event.id(),
                event_type = %event.event_type(),
                "no handler registered for domain event"
            );
            return Ok(());
        }

        let mut first_error = None;
        for handler in handlers {
            if let Err(error) = handler.handle(event).await {
                warn!(
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    handler = handler.name(),
                    error = %error,
                    "domain event handler failed"
                );
                if first_error.is_none() {
                    first_error = Some(error.with_context(format!(
                        "handler '{}' failed for event '{}' ({})",
                        handler.name(),
                        event.id(),
                        event.event_type()
                    )));
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn snapshot(&self, event_type: DomainEventType) -> AppResult<Vec<Arc<dyn DomainEventHandler>>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| AppError::Internal("event handler registry is poisoned".to_owned()))?;
        Ok(handlers.get(&event_type).cloned().unwrap_or_default())
    }
}
