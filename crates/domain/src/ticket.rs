use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tollgate_core::{AppError, AppResult};
use uuid::Uuid;

use crate::event::{DomainEventId, DomainEventType};

/// Approval ticket identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a random ticket identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a ticket identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TicketId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Operation gated by a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Create one resource.
    Create,
    /// Delete one resource.
    Delete,
    /// Start, stop or restart one resource.
    Power,
    /// Batch of create children.
    BatchCreate,
    /// Batch of delete children.
    BatchDelete,
    /// Batch of power children.
    BatchPower,
}

impl OperationType {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::Power => "POWER",
            Self::BatchCreate => "BATCH_CREATE",
            Self::BatchDelete => "BATCH_DELETE",
            Self::BatchPower => "BATCH_POWER",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "CREATE" => Ok(Self::Create),
            "DELETE" => Ok(Self::Delete),
            "POWER" => Ok(Self::Power),
            "BATCH_CREATE" => Ok(Self::BatchCreate),
            "BATCH_DELETE" => Ok(Self::BatchDelete),
            "BATCH_POWER" => Ok(Self::BatchPower),
            _ => Err(AppError::Validation(format!(
                "unknown operation type '{value}'"
            ))),
        }
    }

    /// Returns true for batch parent operations.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::BatchCreate | Self::BatchDelete | Self::BatchPower)
    }

    /// Returns the batch operation wrapping this single operation.
    #[must_use]
    pub fn batch(&self) -> Self {
        match self {
            Self::Create | Self::BatchCreate => Self::BatchCreate,
            Self::Delete | Self::BatchDelete => Self::BatchDelete,
            Self::Power | Self::BatchPower => Self::BatchPower,
        }
    }

    /// Returns the single operation each child of this batch runs.
    #[must_use]
    pub fn child(&self) -> Self {
        match self {
            Self::Create | Self::BatchCreate => Self::Create,
            Self::Delete | Self::BatchDelete => Self::Delete,
            Self::Power | Self::BatchPower => Self::Power,
        }
    }

    /// Returns the event type recorded when this operation is requested.
    #[must_use]
    pub fn requested_event_type(&self) -> DomainEventType {
        match self {
            Self::Create => DomainEventType::ResourceCreateRequested,
            Self::Delete => DomainEventType::ResourceDeleteRequested,
            Self::Power => DomainEventType::ResourcePowerRequested,
            Self::BatchCreate => DomainEventType::BatchCreateRequested,
            Self::BatchDelete => DomainEventType::BatchDeleteRequested,
            Self::BatchPower => DomainEventType::BatchPowerRequested,
        }
    }

    /// Returns the event type recorded when this operation resolves.
    #[must_use]
    pub fn outcome_event_type(&self, succeeded: bool) -> DomainEventType {
        match (self, succeeded) {
            (Self::Create, true) => DomainEventType::ResourceCreateCompleted,
            (Self::Create, false) => DomainEventType::ResourceCreateFailed,
            (Self::Delete, true) => DomainEventType::ResourceDeleteCompleted,
            (Self::Delete, false) => DomainEventType::ResourceDeleteFailed,
            (Self::Power, true) => DomainEventType::ResourcePowerCompleted,
            (Self::Power, false) => DomainEventType::ResourcePowerFailed,
            (Self::BatchCreate, true) => DomainEventType::BatchCreateCompleted,
            (Self::BatchCreate, false) => DomainEventType::BatchCreateFailed,
            (Self::BatchDelete, true) => DomainEventType::BatchDeleteCompleted,
            (Self::BatchDelete, false) => DomainEventType::BatchDeleteFailed,
            (Self::BatchPower, true) => DomainEventType::BatchPowerCompleted,
            (Self::BatchPower, false) => DomainEventType::BatchPowerFailed,
        }
    }
}

impl Display for OperationType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Decision status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Waiting for a decision.
    Pending,
    /// Approved; execution may proceed.
    Approved,
    /// Rejected by an approver.
    Rejected,
    /// Withdrawn before a decision.
    Cancelled,
}

impl TicketStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!(
                "unknown ticket status '{value}'"
            ))),
        }
    }

    /// Returns true for every status except `Pending`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Display for TicketStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Approver-selected settings applied at decision time.
///
/// Stored as a full replacement of any previous value, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOverrides {
    /// Execution target cluster chosen by the approver.
    pub selected_cluster: Option<String>,
    /// Spec snapshot chosen by the approver.
    pub selected_spec: Option<Value>,
}

impl DecisionOverrides {
    /// Returns true when no override is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selected_cluster.is_none() && self.selected_spec.is_none()
    }

    /// Rejects overrides the operation cannot take.
    ///
    /// Deletes, single or batched, stay on the cluster the requester confirmed.
    pub fn validate_for(&self, operation_type: OperationType) -> AppResult<()> {
        let retargets = self
            .selected_cluster
            .as_deref()
            .is_some_and(|cluster| !cluster.trim().is_empty());
        if retargets && operation_type.child() == OperationType::Delete {
            return Err(AppError::Validation(
                "a delete cannot be moved to another cluster".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Result of a conditional ticket decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// This caller's decision took effect.
    Applied,
    /// Zero rows matched: the ticket was no longer pending, or its event
    /// binding did not match.
    AlreadyDecided,
}

impl DecisionOutcome {
    /// Maps an affected-row count to a decision result.
    #[must_use]
    pub fn from_rows_affected(rows_affected: u64) -> Self {
        if rows_affected == 0 {
            Self::AlreadyDecided
        } else {
            Self::Applied
        }
    }

    /// Returns the number of rows the decision affected.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        match self {
            Self::Applied => 1,
            Self::AlreadyDecided => 0,
        }
    }

    /// Returns true when the decision took effect.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Persisted approval ticket record.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalTicket {
    /// Ticket identifier.
    pub id: TicketId,
    /// Event the ticket gates.
    pub event_id: DomainEventId,
    /// Gated operation.
    pub operation_type: OperationType,
    /// Decision status.
    pub status: TicketStatus,
    /// Subject that requested the operation.
    pub requester: String,
    /// Subject that decided the ticket, once decided.
    pub approver: Option<String>,
    /// Requester-supplied justification.
    pub reason: Option<String>,
    /// Approver-supplied rejection reason.
    pub reject_reason: Option<String>,
    /// Subject that withdrew the ticket, when cancelled.
    pub cancelled_by: Option<String>,
    /// Approver-selected overrides.
    pub overrides: DecisionOverrides,
    /// Batch parent when this ticket is a child.
    pub parent_ticket_id: Option<TicketId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Decision timestamp, once decided.
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalTicket {
    /// Creates a fresh pending ticket bound to `event_id`.
    #[must_use]
    pub fn pending(
        id: TicketId,
        event_id: DomainEventId,
        operation_type: OperationType,
        requester: impl Into<String>,
        reason: Option<String>,
        parent_ticket_id: Option<TicketId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            operation_type,
            status: TicketStatus::Pending,
            requester: requester.into(),
            approver: None,
            reason,
            reject_reason: None,
            cancelled_by: None,
            overrides: DecisionOverrides::default(),
            parent_ticket_id,
            created_at,
            decided_at: None,
        }
    }

    /// Returns true when this ticket is a batch child.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.parent_ticket_id.is_some()
    }

    /// Returns true when this ticket is a batch parent.
    #[must_use]
    pub fn is_batch_parent(&self) -> bool {
        self.operation_type.is_batch()
    }
}
