//! Application services and ports.

#![forbid(unsafe_code)]

mod access_token_service;
mod approval_service;
mod batch_resolution;
mod event_dispatcher;
mod event_ports;
mod execution_ports;
mod execution_service;
mod ticket_ports;

#[cfg(test)]
mod test_support;

pub use access_token_service::{
    AccessTokenConfig, AccessTokenReplayStore, AccessTokenService, IssuedAccessToken,
};
pub use approval_service::{
    ApprovalService, ApproveTicketRequest, BatchAdmissionPolicy, BatchDecisionReport, BatchItem,
    CancelAuthority, CancelReport, RejectTicketRequest, SubmitBatchRequest, SubmitOperationRequest, TerminationReport,
};
pub use batch_resolution::{BatchChildSummary, BatchSummary};
pub use event_dispatcher::{DomainEventHandler, EventDispatcher};
pub use event_ports::DomainEventRepository;
pub use execution_ports::{
    ExecutionJob, ExecutionQueue, ExecutionRetryPolicy, InfrastructureClient, JobDisposition,
    ResourceStateRecord, ResourceStateRepository,
};
pub use execution_service::{ExecutionService, JobOutcome};
pub use ticket_ports::{
    AffectedTicket, ApprovalTicketRepository, ApproveTicketInput, BatchDecision,
    BatchDecisionResult, ChildTicketView, RejectTicketInput, SubmittedBatch, SubmittedTicket,
};
