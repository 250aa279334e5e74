//! Approval ticket engine: submission, race-free decisions and batches.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tollgate_core::{AppError, AppResult, UserIdentity};
use tollgate_domain::{
    AggregateType, ApprovalTicket, BatchPayload, DecisionOutcome, DecisionOverrides,
    DeleteConfirmation, DomainEventId, NewDomainEvent, OperationType, ResourceOperation,
    TicketId, validate_delete_confirmation,
};
use tracing::{info, warn};

use crate::batch_resolution::{BatchResolver, BatchSummary};
use crate::event_dispatcher::EventDispatcher;
use crate::event_ports::DomainEventRepository;
use crate::execution_ports::ExecutionQueue;
use crate::ticket_ports::{
    AffectedTicket, ApprovalTicketRepository, ApproveTicketInput, BatchDecision,
    BatchDecisionResult, RejectTicketInput, SubmittedBatch, SubmittedTicket,
};

mod batch;
mod decisions;
mod submit;


/// Admission limits applied to batch submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAdmissionPolicy {
    /// Largest accepted batch.
    pub max_batch_size: usize,
    /// Most pending tickets one requester may hold, counting the new batch.
    pub max_pending_per_requester: u64,
    /// Delay reported to rate-limited callers.
    pub retry_after_seconds: u64,
}

impl Default for BatchAdmissionPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_pending_per_requester: 500,
            retry_after_seconds: 30,
        }
    }
}

/// Request to run one gated operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOperationRequest {
    /// Requested operation.
    pub operation: ResourceOperation,
    /// Requester justification.
    pub reason: Option<String>,
    /// Environment class of the target; required for deletes.
    pub environment: Option<String>,
    /// Delete confirmation.
    pub confirmation: DeleteConfirmation,
}

/// Approval of one ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproveTicketRequest {
    /// Ticket to approve.
    pub ticket_id: TicketId,
    /// Event the approver reviewed.
    pub event_id: DomainEventId,
    /// Approver overrides.
    pub overrides: DecisionOverrides,
}

/// Rejection of one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectTicketRequest {
    /// Ticket to reject.
    pub ticket_id: TicketId,
    /// Event the approver reviewed.
    pub event_id: DomainEventId,
    /// Rejection reason shown to the requester.
    pub reason: String,
}

/// One child of a batch submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    /// Child operation.
    pub operation: ResourceOperation,
    /// Delete confirmation for this child.
    pub confirmation: DeleteConfirmation,
}

/// Request to run a batch of operations of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitBatchRequest {
    /// Batch operation; single operation types are promoted to their batch form.
    pub operation: OperationType,
    /// Children.
    pub items: Vec<BatchItem>,
    /// Requester justification.
    pub reason: Option<String>,
    /// Environment class shared by every child.
    pub environment: Option<String>,
}

/// Result of a bulk decision on a batch parent.
pub type BatchDecisionReport = BatchDecisionResult;

/// Result of terminating pending children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TerminationReport {
    /// Children moved to `CANCELLED`.
    pub terminated: Vec<AffectedTicket>,
    /// Requested children that were no longer pending.
    pub not_cancellable: Vec<TicketId>,
}

/// Authority a cancellation is made under; the caller decides which applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAuthority {
    /// The actor must be the ticket's requester.
    Requester,
    /// The caller verified an elevated capability such as an operator role.
    Elevated,
}

/// Result of cancelling a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReport {
    /// Decision outcome on the cancelled ticket.
    pub outcome: DecisionOutcome,
    /// Children handled with a batch parent; empty for single tickets.
    pub children: TerminationReport,
}

/// Approval engine service.
#[derive(Clone)]
pub struct ApprovalService {
    tickets: Arc<dyn ApprovalTicketRepository>,
    queue: Arc<dyn ExecutionQueue>,
    resolver: BatchResolver,
    admission: BatchAdmissionPolicy,
}

impl ApprovalService {
    /// Creates an approval service.
    #[must_use]
    pub fn new(
        tickets: Arc<dyn ApprovalTicketRepository>,
        events: Arc<dyn DomainEventRepository>,
        queue: Arc<dyn ExecutionQueue>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            resolver: BatchResolver::new(Arc::clone(&tickets), events, dispatcher),
            tickets,
            queue,
            admission: BatchAdmissionPolicy::default(),
        }
    }

    /// Replaces the batch admission policy.
    #[must_use]
    pub fn with_admission_policy(mut self, admission: BatchAdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }

    /// Returns one ticket by id.
    pub async fn find_ticket(&self, ticket_id: TicketId) -> AppResult<ApprovalTicket> {
        self.tickets
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket '{ticket_id}' does not exist")))
    }

    /// Enqueues execution after the approving transaction committed.
    ///
    /// Enqueue failures are logged; the orphan recovery sweep picks the
    /// ticket up later.
    async fn enqueue_after_commit(&self, affected: AffectedTicket) {
        if let Err(error) = self
            .queue
            .enqueue(affected.event_id, affected.ticket_id)
            .await
        {
            warn!(
                ticket_id = %affected.ticket_id,
                event_id = %affected.event_id,
                error = %error,
                "failed to enqueue approved operation; recovery sweep will retry"
            );
        }
    }
}

fn not_cancellable(requested: Vec<TicketId>, terminated: &[AffectedTicket]) -> Vec<TicketId> {
    let terminated: HashSet<TicketId> = terminated.iter().map(|child| child.ticket_id).collect();
    requested
        .into_iter()
        .filter(|id| !terminated.contains(id))
        .collect()
}

fn normalize_reason(reason: Option<String>) -> Option<String> {
    reason
        .map(|reason| reason.trim().to_owned())
        .filter(|reason| !reason.is_empty())
}

fn require_reason(reason: &str) -> AppResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation(
            "a rejection reason is required".to_owned(),
        ));
    }

    Ok(reason.to_owned())
}
