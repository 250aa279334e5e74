use serde::{Deserialize, Serialize};

use crate::event::DomainEventStatus;
use crate::ticket::TicketStatus;

/// Execution-relevant state of one batch child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildState {
    /// Ticket still pending a decision.
    AwaitingDecision,
    /// Approved; execution has not resolved yet.
    Executing,
    /// Approved and executed successfully.
    Succeeded,
    /// Approved and failed.
    Failed,
    /// Rejected, cancelled or terminated before execution.
    Cancelled,
}

impl ChildState {
    /// Derives the child state from its ticket and event statuses.
    #[must_use]
    pub fn from_statuses(ticket: TicketStatus, event: DomainEventStatus) -> Self {
        match ticket {
            TicketStatus::Pending => Self::AwaitingDecision,
            TicketStatus::Rejected | TicketStatus::Cancelled => Self::Cancelled,
            TicketStatus::Approved => match event {
                DomainEventStatus::Pending | DomainEventStatus::Processing => Self::Executing,
                DomainEventStatus::Completed => Self::Succeeded,
                DomainEventStatus::Failed => Self::Failed,
                DomainEventStatus::Cancelled => Self::Cancelled,
            },
        }
    }

    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingDecision => "awaiting_decision",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Aggregate counts over the children of one batch parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    /// Number of children.
    pub total: u32,
    /// Children executed successfully.
    pub success: u32,
    /// Children that failed.
    pub failed: u32,
    /// Children not finished yet, decided or not.
    pub pending: u32,
    /// Children that will never execute.
    pub cancelled: u32,
}

impl BatchCounts {
    /// Counts children by state.
    #[must_use]
    pub fn from_states(states: &[ChildState]) -> Self {
        states.iter().fold(Self::default(), |mut counts, state| {
            counts.total = counts.total.saturating_add(1);
            match state {
                ChildState::AwaitingDecision | ChildState::Executing => {
                    counts.pending = counts.pending.saturating_add(1);
                }
                ChildState::Succeeded => counts.success = counts.success.saturating_add(1),
                ChildState::Failed => counts.failed = counts.failed.saturating_add(1),
                ChildState::Cancelled => counts.cancelled = counts.cancelled.saturating_add(1),
            }
            counts
        })
    }
}

/// Status of a batch parent, derived from its children on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// At least one child is undecided.
    PendingApproval,
    /// Every child is decided and at least one approved child is still running.
    InProgress,
    /// Executed children are a mix of successes and failures.
    PartialSuccess,
    /// Every executed child succeeded.
    Completed,
    /// Every executed child failed.
    Failed,
    /// No child executed.
    Cancelled,
}

impl BatchStatus {
    /// Derives the parent status from child states.
    #[must_use]
    pub fn derive(states: &[ChildState]) -> Self {
        if states.contains(&ChildState::AwaitingDecision) {
            return Self::PendingApproval;
        }

        if states.contains(&ChildState::Executing) {
            return Self::InProgress;
        }

        let counts = BatchCounts::from_states(states);
        match (counts.success, counts.failed) {
            (0, 0) => Self::Cancelled,
            (_, 0) => Self::Completed,
            (0, _) => Self::Failed,
            _ => Self::PartialSuccess,
        }
    }

    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::InProgress => "IN_PROGRESS",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns true once no child can change state without a retry.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingApproval | Self::InProgress)
    }
}
