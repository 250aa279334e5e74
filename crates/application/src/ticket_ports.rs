use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tollgate_core::AppResult;
use tollgate_domain::{
    ApprovalTicket, DecisionOutcome, DecisionOverrides, DomainEvent, DomainEventId,
    DomainEventStatus, TicketId,
};

/// Ticket persisted together with the event it gates.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedTicket {
    /// Pending ticket.
    pub ticket: ApprovalTicket,
    /// Pending `*_requested` event.
    pub event: DomainEvent,
}

/// Batch parent and children persisted in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedBatch {
    /// Parent ticket with its summary event.
    pub parent: SubmittedTicket,
    /// Child tickets with their own events.
    pub children: Vec<SubmittedTicket>,
}

/// Ticket touched by a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffectedTicket {
    /// Ticket identifier.
    pub ticket_id: TicketId,
    /// Event bound to the ticket.
    pub event_id: DomainEventId,
}

/// Child ticket joined with the status of its event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildTicketView {
    /// Child ticket.
    pub ticket: ApprovalTicket,
    /// Status of the child's event.
    pub event_status: DomainEventStatus,
}

/// Conditional approval of one ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproveTicketInput {
    /// Ticket to approve.
    pub ticket_id: TicketId,
    /// Event the caller believes the ticket gates.
    pub event_id: DomainEventId,
    /// Approving subject.
    pub approver: String,
    /// Overrides stored as a full replacement.
    pub overrides: DecisionOverrides,
    /// Decision time.
    pub decided_at: DateTime<Utc>,
}

/// Conditional rejection of one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectTicketInput {
    /// Ticket to reject.
    pub ticket_id: TicketId,
    /// Event the caller believes the ticket gates.
    pub event_id: DomainEventId,
    /// Rejecting subject.
    pub approver: String,
    /// Non-empty rejection reason.
    pub reason: String,
    /// Decision time.
    pub decided_at: DateTime<Utc>,
}

/// Decision applied to a batch parent and its pending children.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchDecision {
    /// Approve every pending child with the same overrides.
    Approve {
        /// Overrides stored on every approved child.
        overrides: DecisionOverrides,
    },
    /// Reject every pending child with the same reason.
    Reject {
        /// Rejection reason.
        reason: String,
    },
}

/// Result of deciding a batch parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDecisionResult {
    /// Outcome of the conditional update on the parent row.
    pub parent: DecisionOutcome,
    /// Children decided in the same transaction.
    pub children: Vec<AffectedTicket>,
}

/// Repository port for approval tickets.
///
/// Every decision is a single conditional update guarded by
/// `status = 'PENDING'`; zero affected rows is reported as
/// [`DecisionOutcome::AlreadyDecided`], never as an error.
#[async_trait]
pub trait ApprovalTicketRepository: Send + Sync {
    /// Persists a ticket and its event in one transaction.
    async fn insert_ticket_with_event(&self, submitted: &SubmittedTicket) -> AppResult<()>;

    /// Persists a batch parent, its children and all their events in one transaction.
    async fn insert_batch(&self, batch: &SubmittedBatch) -> AppResult<()>;

    /// Returns one ticket by id.
    async fn find_ticket(&self, ticket_id: TicketId) -> AppResult<Option<ApprovalTicket>>;

    /// Approves a pending ticket bound to `input.event_id`.
    async fn approve_ticket(&self, input: ApproveTicketInput) -> AppResult<DecisionOutcome>;

    /// Rejects a pending ticket and cancels its event in the same transaction.
    async fn reject_ticket(&self, input: RejectTicketInput) -> AppResult<DecisionOutcome>;

    /// Cancels a pending ticket and its event in the same transaction.
    async fn cancel_ticket(
        &self,
        ticket_id: TicketId,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<DecisionOutcome>;

    /// Lists children of a batch parent with their event statuses.
    async fn list_children(&self, parent_ticket_id: TicketId) -> AppResult<Vec<ChildTicketView>>;

    /// Decides the parent row and every still pending child in one transaction.
    ///
    /// Children are only touched when the parent decision applied.
    async fn decide_batch(
        &self,
        parent_ticket_id: TicketId,
        approver: &str,
        decision: BatchDecision,
        decided_at: DateTime<Utc>,
    ) -> AppResult<BatchDecisionResult>;

    /// Cancels pending children, optionally restricted to `selection`.
    async fn terminate_pending_children(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<Vec<AffectedTicket>>;

    /// Moves failed events of approved children back to `pending`.
    ///
    /// The parent's summary event leaves `failed` in the same transaction so
    /// the batch outcome is published again once the retried children resolve.
    async fn reset_failed_children(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
    ) -> AppResult<Vec<AffectedTicket>>;

    /// Counts pending non-parent tickets requested by `requester`.
    async fn count_pending_tickets_for_requester(&self, requester: &str) -> AppResult<u64>;

    /// Lists approved tickets decided before `decided_before` whose event is still `pending`.
    async fn list_orphaned_approvals(
        &self,
        decided_before: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<AffectedTicket>>;
}
