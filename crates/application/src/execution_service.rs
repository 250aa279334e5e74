//! Durable execution of approved operations.
//!
//! Workers claim jobs from the queue, move the event to `processing` in its
//! own statement, call the infrastructure API with no transaction held and
//! record the outcome in a second statement. Jobs are delivered at least
//! once, so every step tolerates redelivery.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{
    AggregateType, ApprovalTicket, DomainEvent, DomainEventStatus, NewDomainEvent,
    PowerAction, ResourceOperation, ResourceState, TicketStatus,
};
use tracing::{info, warn};

use crate::batch_resolution::{BatchResolver, SYSTEM_ACTOR};
use crate::event_dispatcher::EventDispatcher;
use crate::event_ports::DomainEventRepository;
use crate::execution_ports::{
    ExecutionJob, ExecutionQueue, ExecutionRetryPolicy, InfrastructureClient, JobDisposition,
    ResourceStateRecord, ResourceStateRepository,
};
use crate::ticket_ports::ApprovalTicketRepository;

mod recovery;


/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// External effect applied and recorded.
    Succeeded,
    /// Event was already terminal; no external call was made.
    AlreadyResolved,
    /// Job did not reference an approved ticket and was dropped.
    Discarded,
    /// Retryable failure; the job returns to the queue.
    RetryScheduled {
        /// Earliest time the job can run again.
        available_at: DateTime<Utc>,
    },
    /// Terminal failure recorded on the event.
    Failed,
}

impl JobOutcome {
    /// Returns stable log value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::AlreadyResolved => "already_resolved",
            Self::Discarded => "discarded",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Failed => "failed",
        }
    }
}

enum CallResult {
    Applied,
    Retryable(String),
    Terminal(String),
}

/// Execution service run by worker processes.
#[derive(Clone)]
pub struct ExecutionService {
    tickets: Arc<dyn ApprovalTicketRepository>,
    events: Arc<dyn DomainEventRepository>,
    queue: Arc<dyn ExecutionQueue>,
    client: Arc<dyn InfrastructureClient>,
    resource_states: Arc<dyn ResourceStateRepository>,
    resolver: BatchResolver,
    retry_policy: ExecutionRetryPolicy,
}

impl ExecutionService {
    /// Creates an execution service.
    #[must_use]
    pub fn new(
        tickets: Arc<dyn ApprovalTicketRepository>,
        events: Arc<dyn DomainEventRepository>,
        queue: Arc<dyn ExecutionQueue>,
        client: Arc<dyn InfrastructureClient>,
        resource_states: Arc<dyn ResourceStateRepository>,
        dispatcher: Arc<EventDispatcher>,
        retry_policy: ExecutionRetryPolicy,
    ) -> Self {
        Self {
            resolver: BatchResolver::new(Arc::clone(&tickets), Arc::clone(&events), dispatcher),
            tickets,
            events,
            queue,
            client,
            resource_states,
            retry_policy,
        }
    }

    /// Leases up to `limit` jobs for `worker_id`.
    pub async fn claim_jobs_for_worker(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ExecutionJob>> {
        if worker_id.trim().is_empty() {
            return Err(AppError::Validation("worker_id must not be empty".to_owned()));
        }

        if limit == 0 || lease_seconds == 0 {
            return Err(AppError::Validation(
                "claim limit and lease seconds must be greater than zero".to_owned(),
            ));
        }

        self.queue.claim(worker_id, limit, lease_seconds).await
    }

    /// Executes one claimed job.
    pub async fn execute_claimed_job(&self, job: &ExecutionJob) -> AppResult<JobOutcome> {
        let Some(event) = self.events.find_event(job.event_id).await? else {
            warn!(job_id = %job.job_id, event_id = %job.event_id, "job references a missing event");
            self.queue
                .fail(job, "event does not exist", false, self.retry_policy)
                .await?;
            return Ok(JobOutcome::Discarded);
        };

        let ticket = self.tickets.find_ticket(job.ticket_id).await?;
        let Some(ticket) = ticket.filter(|ticket| {
            ticket.event_id == event.id() && ticket.status == TicketStatus::Approved
        }) else {
            warn!(
                job_id = %job.job_id,
                ticket_id = %job.ticket_id,
                event_id = %job.event_id,
                "job does not reference an approved ticket bound to its event"
            );
            self.queue.complete(job).await?;
            return Ok(JobOutcome::Discarded);
        };

        let Some(event) = self.begin_processing(event).await? else {
            self.queue.complete(job).await?;
            return Ok(JobOutcome::AlreadyResolved);
        };

        let operation = match ResourceOperation::decode(event.payload()) {
            Ok(operation) => operation.with_overrides(&ticket.overrides),
            Err(error) => {
                return self
                    .record_failure(job, &ticket, &event, None, error.to_string())
                    .await;
            }
        };

        if let Some(state) = ResourceState::in_flight(&operation) {
            self.record_state(&operation, state, &event).await?;
        }

        match self.call_infrastructure(&operation, &event).await {
            CallResult::Applied => self.record_success(job, &ticket, &event, &operation).await,
            CallResult::Retryable(message) if !self.retry_policy.is_exhausted(job.attempt) => {
                let disposition = self
                    .queue
                    .fail(job, message.as_str(), true, self.retry_policy)
                    .await?;
                match disposition {
                    JobDisposition::RetryScheduled { available_at } => {
                        warn!(
                            job_id = %job.job_id,
                            event_id = %event.id(),
                            attempt = job.attempt,
                            error = %message,
                            "infrastructure call failed; retry scheduled"
                        );
                        Ok(JobOutcome::RetryScheduled { available_at })
                    }
                    JobDisposition::DeadLettered => {
                        self.settle_failure(job, &ticket, &event, Some(&operation), message)
                            .await?;
                        Ok(JobOutcome::Failed)
                    }
                }
            }
            CallResult::Retryable(message) | CallResult::Terminal(message) => {
                self.record_failure(job, &ticket, &event, Some(&operation), message)
                    .await
            }
        }
    }

    /// Moves the event to `processing` unless it is already terminal.
    async fn begin_processing(&self, event: DomainEvent) -> AppResult<Option<DomainEvent>> {
        match event.status() {
            DomainEventStatus::Processing => return Ok(Some(event)),
            status if status.is_terminal() => return Ok(None),
            _ => {}
        }

        let transition = self
            .events
            .set_event_status(event.id(), DomainEventStatus::Processing)
            .await?;
        if transition.is_applied() {
            return Ok(Some(event.with_status(DomainEventStatus::Processing)));
        }

        let current = self.events.find_event(event.id()).await?;
        Ok(current.filter(|event| !event.status().is_terminal()))
    }

    async fn call_infrastructure(
        &self,
        operation: &ResourceOperation,
        event: &DomainEvent,
    ) -> CallResult {
        let idempotency_key = event.id().to_string();
        let result = match operation {
            ResourceOperation::Create { identity, spec } => {
                match self
                    .client
                    .create_resource(identity, spec, &idempotency_key)
                    .await
                {
                    Err(AppError::Conflict(message)) => {
                        info!(event_id = %event.id(), resource = %identity, %message, "resource already exists");
                        Ok(())
                    }
                    other => other,
                }
            }
            ResourceOperation::Delete { identity } => {
                match self.client.delete_resource(identity, &idempotency_key).await {
                    Err(AppError::NotFound(message)) => {
                        info!(event_id = %event.id(), resource = %identity, %message, "resource already gone");
                        Ok(())
                    }
                    other => other,
                }
            }
            ResourceOperation::Power { identity, action } => match action {
                PowerAction::Start => self.client.start_resource(identity, &idempotency_key).await,
                PowerAction::Stop => self.client.stop_resource(identity, &idempotency_key).await,
                PowerAction::Restart => {
                    self.client
                        .restart_resource(identity, &idempotency_key)
                        .await
                }
            },
        };

        match result {
            Ok(()) => CallResult::Applied,
            Err(error) if error.is_retryable() || matches!(error, AppError::Internal(_)) => {
                CallResult::Retryable(error.to_string())
            }
            Err(error) => CallResult::Terminal(error.to_string()),
        }
    }

    async fn record_success(
        &self,
        job: &ExecutionJob,
        ticket: &ApprovalTicket,
        event: &DomainEvent,
        operation: &ResourceOperation,
    ) -> AppResult<JobOutcome> {
        let transition = self
            .events
            .set_event_status(event.id(), DomainEventStatus::Completed)
            .await?;
        self.record_state(operation, ResourceState::after_success(operation), event)
            .await?;

        if transition.is_applied() {
            info!(
                job_id = %job.job_id,
                event_id = %event.id(),
                resource = %operation.identity(),
                "operation executed"
            );
            self.publish_result(ticket, event, operation, true, None).await;
            self.resolver.resolve_parent_of(ticket).await;
        }

        self.queue.complete(job).await?;
        Ok(if transition.is_applied() {
            JobOutcome::Succeeded
        } else {
            JobOutcome::AlreadyResolved
        })
    }

    /// Records a terminal failure and fails the job without retry.
    async fn record_failure(
        &self,
        job: &ExecutionJob,
        ticket: &ApprovalTicket,
        event: &DomainEvent,
        operation: Option<&ResourceOperation>,
        message: String,
    ) -> AppResult<JobOutcome> {
        self.settle_failure(job, ticket, event, operation, message.clone())
            .await?;
        self.queue
            .fail(job, message.as_str(), false, self.retry_policy)
            .await?;
        Ok(JobOutcome::Failed)
    }

    /// Marks the event failed and publishes the outcome; the job is left as is.
    async fn settle_failure(
        &self,
        job: &ExecutionJob,
        ticket: &ApprovalTicket,
        event: &DomainEvent,
        operation: Option<&ResourceOperation>,
        message: String,
    ) -> AppResult<()> {
        let transition = self
            .events
            .set_event_status(event.id(), DomainEventStatus::Failed)
            .await?;

        if let Some(operation) = operation {
            self.record_state(operation, ResourceState::Error, event).await?;
        }

        if transition.is_applied() {
            warn!(
                job_id = %job.job_id,
                event_id = %event.id(),
                attempt = job.attempt,
                error = %message,
                "operation failed"
            );
            if let Some(operation) = operation {
                self.publish_result(ticket, event, operation, false, Some(message.as_str()))
                    .await;
            }
            self.resolver.resolve_parent_of(ticket).await;
        }

        Ok(())
    }

    async fn record_state(
        &self,
        operation: &ResourceOperation,
        state: ResourceState,
        event: &DomainEvent,
    ) -> AppResult<()> {
        self.resource_states
            .record_resource_state(ResourceStateRecord {
                identity: operation.identity().clone(),
                state,
                last_event_id: event.id(),
                updated_at: Utc::now(),
            })
            .await
    }

    async fn publish_result(
        &self,
        ticket: &ApprovalTicket,
        event: &DomainEvent,
        operation: &ResourceOperation,
        succeeded: bool,
        error: Option<&str>,
    ) {
        let payload = serde_json::json!({
            "request_event_id": event.id(),
            "ticket_id": ticket.id,
            "operation": operation,
            "error": error,
        });
        let outcome = NewDomainEvent::with_json(
            ticket.operation_type.outcome_event_type(succeeded),
            AggregateType::Resource,
            event.aggregate_id(),
            &payload,
            SYSTEM_ACTOR,
        );

        let published = match outcome {
            Ok(outcome) => self.resolver.publish_outcome(outcome).await,
            Err(error) => Err(error),
        };
        if let Err(error) = published {
            warn!(
                event_id = %event.id(),
                error = %error,
                "failed to publish operation outcome event"
            );
        }
    }
}
