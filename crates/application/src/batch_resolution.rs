use std::sync::Arc;

use serde::Serialize;
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{
    AggregateType, ApprovalTicket, BatchCounts, BatchStatus, ChildState, DomainEvent,
    DomainEventStatus, NewDomainEvent, TicketId,
};
use tracing::{info, warn};

use crate::event_dispatcher::EventDispatcher;
use crate::event_ports::DomainEventRepository;
use crate::ticket_ports::{ApprovalTicketRepository, ChildTicketView};

/// Subject recorded on events the engine emits on its own.
pub(crate) const SYSTEM_ACTOR: &str = "tollgate-engine";

/// Per-child line of a batch summary.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchChildSummary {
    /// Child ticket.
    pub ticket: ApprovalTicket,
    /// Status of the child's event.
    pub event_status: DomainEventStatus,
    /// Derived child state.
    pub state: ChildState,
}

/// Batch parent with its status recomputed from children.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    /// Parent ticket.
    pub parent: ApprovalTicket,
    /// Derived status.
    pub status: BatchStatus,
    /// Aggregate counts.
    pub counts: BatchCounts,
    /// Children in creation order.
    pub children: Vec<BatchChildSummary>,
}

#[derive(Debug, Serialize)]
struct BatchOutcomePayload {
    parent_ticket_id: TicketId,
    status: BatchStatus,
    counts: BatchCounts,
}

/// Derives batch status and settles the parent's summary event.
///
/// The parent's summary event is never executed. Once the batch turns
/// terminal the first writer to move it out of `pending` publishes the batch
/// outcome event; everyone else sees `Skipped` and publishes nothing.
#[derive(Clone)]
pub(crate) struct BatchResolver {
    tickets: Arc<dyn ApprovalTicketRepository>,
    events: Arc<dyn DomainEventRepository>,
    dispatcher: Arc<EventDispatcher>,
}

impl BatchResolver {
    pub(crate) fn new(
        tickets: Arc<dyn ApprovalTicketRepository>,
        events: Arc<dyn DomainEventRepository>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            tickets,
            events,
            dispatcher,
        }
    }

    /// Loads a batch parent, rejecting tickets that are not parents.
    pub(crate) async fn find_parent(&self, parent_ticket_id: TicketId) -> AppResult<ApprovalTicket> {
        let parent = self
            .tickets
            .find_ticket(parent_ticket_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("ticket '{parent_ticket_id}' does not exist"))
            })?;

        if !parent.is_batch_parent() {
            return Err(AppError::Validation(format!(
                "ticket '{parent_ticket_id}' is not a batch parent"
            )));
        }

        Ok(parent)
    }

    /// Recomputes the batch summary and settles the parent event when terminal.
    pub(crate) async fn resolve(&self, parent_ticket_id: TicketId) -> AppResult<BatchSummary> {
        let parent = self.find_parent(parent_ticket_id).await?;
        let children = self.tickets.list_children(parent_ticket_id).await?;
        let summary = summarize(parent, children);

        if summary.status.is_terminal() {
            self.settle_parent_event(&summary).await?;
        }

        Ok(summary)
    }

    /// Resolves the parent of `child` when it has one.
    pub(crate) async fn resolve_parent_of(&self, child: &ApprovalTicket) {
        let Some(parent_ticket_id) = child.parent_ticket_id else {
            return;
        };

        if let Err(error) = self.resolve(parent_ticket_id).await {
            warn!(
                ticket_id = %child.id,
                parent_ticket_id = %parent_ticket_id,
                error = %error,
                "failed to resolve batch after child change"
            );
        }
    }

    /// Records an outcome event, dispatches it and stores the delivery result.
    pub(crate) async fn publish_outcome(&self, event: NewDomainEvent) -> AppResult<()> {
        let event = self.events.record_event(event).await?;
        let delivered = match self.dispatcher.dispatch(&event).await {
            Ok(()) => DomainEventStatus::Completed,
            Err(error) => {
                warn!(
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    error = %error,
                    "outcome event delivery failed"
                );
                DomainEventStatus::Failed
            }
        };
        self.events.set_event_status(event.id(), delivered).await?;
        Ok(())
    }

    /// Dispatches an event without failing the caller.
    pub(crate) async fn notify(&self, event: &DomainEvent) {
        if let Err(error) = self.dispatcher.dispatch(event).await {
            warn!(
                event_id = %event.id(),
                event_type = %event.event_type(),
                error = %error,
                "domain event delivery failed"
            );
        }
    }

    async fn settle_parent_event(&self, summary: &BatchSummary) -> AppResult<()> {
        let parent = &summary.parent;
        let target = match summary.status {
            BatchStatus::Completed => DomainEventStatus::Completed,
            BatchStatus::Failed | BatchStatus::PartialSuccess => DomainEventStatus::Failed,
            BatchStatus::Cancelled => DomainEventStatus::Cancelled,
            BatchStatus::PendingApproval | BatchStatus::InProgress => return Ok(()),
        };

        let transition = self.events.set_event_status(parent.event_id, target).await?;
        if !transition.is_applied() || target == DomainEventStatus::Cancelled {
            return Ok(());
        }

        info!(
            parent_ticket_id = %parent.id,
            status = summary.status.as_str(),
            success = summary.counts.success,
            failed = summary.counts.failed,
            cancelled = summary.counts.cancelled,
            "batch resolved"
        );

        let outcome = NewDomainEvent::with_json(
            parent
                .operation_type
                .outcome_event_type(summary.status == BatchStatus::Completed),
            AggregateType::Batch,
            parent.id.to_string(),
            &BatchOutcomePayload {
                parent_ticket_id: parent.id,
                status: summary.status,
                counts: summary.counts,
            },
            SYSTEM_ACTOR,
        )?;
        self.publish_outcome(outcome).await
    }
}

/// Builds the summary of one batch from its children.
fn summarize(parent: ApprovalTicket, children: Vec<ChildTicketView>) -> BatchSummary {
    let children: Vec<BatchChildSummary> = children
        .into_iter()
        .map(|child| BatchChildSummary {
            state: ChildState::from_statuses(child.ticket.status, child.event_status),
            ticket: child.ticket,
            event_status: child.event_status,
        })
        .collect();
    let states: Vec<ChildState> = children.iter().map(|child| child.state).collect();

    BatchSummary {
        parent,
        status: BatchStatus::derive(&states),
        counts: BatchCounts::from_states(&states),
        children,
    }
}
