use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tollgate_core::{AppError, AppResult, NonEmptyString};
use uuid::Uuid;

/// Domain event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainEventId(Uuid);

impl DomainEventId {
    /// Creates a random event identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event identifier from an existing UUID value.
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

impl Default for DomainEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for DomainEventId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Kind of intent or outcome recorded by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventType {
    /// Resource creation was requested.
    ResourceCreateRequested,
    /// Resource creation finished successfully.
    ResourceCreateCompleted,
    /// Resource creation failed.
    ResourceCreateFailed,
    /// Resource deletion was requested.
    ResourceDeleteRequested,
    /// Resource deletion finished successfully.
    ResourceDeleteCompleted,
    /// Resource deletion failed.
    ResourceDeleteFailed,
    /// Power action was requested.
    ResourcePowerRequested,
    /// Power action finished successfully.
    ResourcePowerCompleted,
    /// Power action failed.
    ResourcePowerFailed,
    /// Batch creation was requested.
    BatchCreateRequested,
    /// Every child of a batch creation succeeded.
    BatchCreateCompleted,
    /// At least one child of a batch creation failed.
    BatchCreateFailed,
    /// Batch deletion was requested.
    BatchDeleteRequested,
    /// Every child of a batch deletion succeeded.
    BatchDeleteCompleted,
    /// At least one child of a batch deletion failed.
    BatchDeleteFailed,
    /// Batch power action was requested.
    BatchPowerRequested,
    /// Every child of a batch power action succeeded.
    BatchPowerCompleted,
    /// At least one child of a batch power action failed.
    BatchPowerFailed,
}

impl DomainEventType {
    /// Every event type, requests first within each family.
    pub const ALL: [Self; 18] = [
        Self::ResourceCreateRequested,
        Self::ResourceCreateCompleted,
        Self::ResourceCreateFailed,
        Self::ResourceDeleteRequested,
        Self::ResourceDeleteCompleted,
        Self::ResourceDeleteFailed,
        Self::ResourcePowerRequested,
        Self::ResourcePowerCompleted,
        Self::ResourcePowerFailed,
        Self::BatchCreateRequested,
        Self::BatchCreateCompleted,
        Self::BatchCreateFailed,
        Self::BatchDeleteRequested,
        Self::BatchDeleteCompleted,
        Self::BatchDeleteFailed,
        Self::BatchPowerRequested,
        Self::BatchPowerCompleted,
        Self::BatchPowerFailed,
    ];

    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceCreateRequested => "resource_create_requested",
            Self::ResourceCreateCompleted => "resource_create_completed",
            Self::ResourceCreateFailed => "resource_create_failed",
            Self::ResourceDeleteRequested => "resource_delete_requested",
            Self::ResourceDeleteCompleted => "resource_delete_completed",
            Self::ResourceDeleteFailed => "resource_delete_failed",
            Self::ResourcePowerRequested => "resource_power_requested",
            Self::ResourcePowerCompleted => "resource_power_completed",
            Self::ResourcePowerFailed => "resource_power_failed",
            Self::BatchCreateRequested => "batch_create_requested",
            Self::BatchCreateCompleted => "batch_create_completed",
            Self::BatchCreateFailed => "batch_create_failed",
            Self::BatchDeleteRequested => "batch_delete_requested",
            Self::BatchDeleteCompleted => "batch_delete_completed",
            Self::BatchDeleteFailed => "batch_delete_failed",
            Self::BatchPowerRequested => "batch_power_requested",
            Self::BatchPowerCompleted => "batch_power_completed",
            Self::BatchPowerFailed => "batch_power_failed",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == value)
            .ok_or_else(|| AppError::Validation(format!("unknown domain event type '{value}'")))
    }

    /// Returns true for events that record a requested intent.
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.as_str().ends_with("_requested")
    }
}

impl Display for DomainEventType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    /// A managed infrastructure resource.
    Resource,
    /// A batch parent ticket.
    Batch,
}

impl AggregateType {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Batch => "batch",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "resource" => Ok(Self::Resource),
            "batch" => Ok(Self::Batch),
            _ => Err(AppError::Validation(format!(
                "unknown aggregate type '{value}'"
            ))),
        }
    }
}

/// Processing status of a domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventStatus {
    /// Recorded, not yet claimed by a worker.
    Pending,
    /// Claimed by a worker; the external effect is in flight.
    Processing,
    /// External effect resolved successfully.
    Completed,
    /// External effect failed terminally.
    Failed,
    /// Owning ticket was rejected or cancelled before execution.
    Cancelled,
}

impl DomainEventStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!(
                "unknown domain event status '{value}'"
            ))),
        }
    }

    /// Returns true when no worker will act on the event again.
    ///
    /// `Failed` counts as terminal even though a batch retry may re-arm it.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the states an event may be in right before moving to `target`.
    ///
    /// An empty slice means no transition leads to `target`.
    #[must_use]
    pub fn legal_predecessors(target: Self) -> &'static [Self] {
        match target {
            Self::Pending => &[Self::Failed],
            Self::Processing => &[Self::Pending],
            Self::Completed | Self::Failed => &[Self::Pending, Self::Processing],
            Self::Cancelled => &[Self::Pending],
        }
    }

    /// Returns true when `self -> target` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        Self::legal_predecessors(target).contains(self)
    }
}

impl Display for DomainEventStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Result of a conditional event status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// The event was in a legal prior state and now holds the new status.
    Applied,
    /// Zero rows matched; another writer moved the event first.
    Skipped,
}

impl StatusTransition {
    /// Maps an affected-row count to a transition result.
    #[must_use]
    pub fn from_rows_affected(rows_affected: u64) -> Self {
        if rows_affected == 0 {
            Self::Skipped
        } else {
            Self::Applied
        }
    }

    /// Returns the number of rows the write affected.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        match self {
            Self::Applied => 1,
            Self::Skipped => 0,
        }
    }

    /// Returns true when the write took effect.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Validated event payload waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDomainEvent {
    event_type: DomainEventType,
    aggregate_type: AggregateType,
    aggregate_id: NonEmptyString,
    payload: Vec<u8>,
    created_by: NonEmptyString,
}

impl NewDomainEvent {
    /// Creates a validated event intent.
    pub fn new(
        event_type: DomainEventType,
        aggregate_type: AggregateType,
        aggregate_id: impl Into<String>,
        payload: Vec<u8>,
        created_by: impl Into<String>,
    ) -> AppResult<Self> {
        let aggregate_id = NonEmptyString::new(aggregate_id)
            .map_err(|_| AppError::Validation("event aggregate_id is required".to_owned()))?;
        let created_by = NonEmptyString::new(created_by)
            .map_err(|_| AppError::Validation("event creator is required".to_owned()))?;

        if payload.is_empty() {
            return Err(AppError::Validation("event payload is required".to_owned()));
        }

        Ok(Self {
            event_type,
            aggregate_type,
            aggregate_id,
            payload,
            created_by,
        })
    }

    /// Creates an event intent whose payload is the JSON encoding of `payload`.
    pub fn with_json<T: Serialize>(
        event_type: DomainEventType,
        aggregate_type: AggregateType,
        aggregate_id: impl Into<String>,
        payload: &T,
        created_by: impl Into<String>,
    ) -> AppResult<Self> {
        let bytes = serde_json::to_vec(payload).map_err(|error| {
            AppError::Validation(format!("failed to encode event payload: {error}"))
        })?;
        Self::new(event_type, aggregate_type, aggregate_id, bytes, created_by)
    }

    /// Returns the event type.
    #[must_use]
    pub fn event_type(&self) -> DomainEventType {
        self.event_type
    }

    /// Returns the aggregate type.
    #[must_use]
    pub fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        self.aggregate_id.as_str()
    }

    /// Returns the opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Returns the creator subject.
    #[must_use]
    pub fn created_by(&self) -> &str {
        self.created_by.as_str()
    }

    /// Materializes the persisted form in `pending` status.
    #[must_use]
    pub fn into_event(self, id: DomainEventId, created_at: DateTime<Utc>) -> DomainEvent {
        DomainEvent {
            id,
            event_type: self.event_type,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id.into(),
            payload: self.payload,
            status: DomainEventStatus::Pending,
            created_by: self.created_by.into(),
            created_at,
            archived_at: None,
        }
    }
}

/// Raw stored columns used to restore a [`DomainEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEventParts {
    /// Event identifier.
    pub id: DomainEventId,
    /// Event type.
    pub event_type: DomainEventType,
    /// Aggregate type.
    pub aggregate_type: AggregateType,
    /// Aggregate identifier.
    pub aggregate_id: String,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Current status.
    pub status: DomainEventStatus,
    /// Creator subject.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Archive timestamp, when archived.
    pub archived_at: Option<DateTime<Utc>>,
}

/// Immutable intent record.
///
/// Only `status` and `archived_at` change after the event is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    id: DomainEventId,
    event_type: DomainEventType,
    aggregate_type: AggregateType,
    aggregate_id: String,
    payload: Vec<u8>,
    status: DomainEventStatus,
    created_by: String,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl DomainEvent {
    /// Restores an event from stored columns.
    #[must_use]
    pub fn restore(parts: DomainEventParts) -> Self {
        Self {
            id: parts.id,
            event_type: parts.event_type,
            aggregate_type: parts.aggregate_type,
            aggregate_id: parts.aggregate_id,
            payload: parts.payload,
            status: parts.status,
            created_by: parts.created_by,
            created_at: parts.created_at,
            archived_at: parts.archived_at,
        }
    }

    /// Returns the event identifier.
    #[must_use]
    pub fn id(&self) -> DomainEventId {
        self.id
    }

    /// Returns the event type.
    #[must_use]
    pub fn event_type(&self) -> DomainEventType {
        self.event_type
    }

    /// Returns the aggregate type.
    #[must_use]
    pub fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        self.aggregate_id.as_str()
    }

    /// Returns the opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> DomainEventStatus {
        self.status
    }

    /// Returns the creator subject.
    #[must_use]
    pub fn created_by(&self) -> &str {
        self.created_by.as_str()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the archive timestamp, when archived.
    #[must_use]
    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    /// Returns a copy carrying a new status, for storage adapters.
    #[must_use]
    pub fn with_status(mut self, status: DomainEventStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns a copy carrying an archive timestamp, for storage adapters.
    #[must_use]
    pub fn with_archived_at(mut self, archived_at: DateTime<Utc>) -> Self {
        self.archived_at = Some(archived_at);
        self
    }
}
