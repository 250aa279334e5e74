//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod access_token;
mod batch;
mod confirmation;
mod event;
mod resource;
mod ticket;

pub use access_token::{
    AccessScope, AccessTokenClaims, DEFAULT_ACCESS_TOKEN_TTL_SECONDS, MAX_ACCESS_TOKEN_TTL_SECONDS,
};
pub use batch::{BatchCounts, BatchStatus, ChildState};
pub use confirmation::{DeleteConfirmation, EnvironmentClass, validate_delete_confirmation};
pub use event::{
    AggregateType, DomainEvent, DomainEventId, DomainEventParts, DomainEventStatus,
    DomainEventType, NewDomainEvent, StatusTransition,
};
pub use resource::{BatchPayload, PowerAction, ResourceIdentity, ResourceOperation, ResourceState};
pub use ticket::{
    ApprovalTicket, DecisionOutcome, DecisionOverrides, OperationType, TicketId, TicketStatus,
};
