use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tollgate_core::{AppError, AppResult, UserIdentity};
use tollgate_domain::{
    AggregateType, ApprovalTicket, DecisionOutcome, DomainEvent, DomainEventId,
    DomainEventStatus, DomainEventType, NewDomainEvent, ResourceIdentity, StatusTransition,
    TicketId, TicketStatus,
};

use crate::{
    AffectedTicket, ApprovalService, ApprovalTicketRepository, ApproveTicketInput,
    BatchDecision, BatchDecisionResult, ChildTicketView, DomainEventRepository, EventDispatcher,
    ExecutionJob, ExecutionQueue, ExecutionRetryPolicy, ExecutionService, InfrastructureClient,
    JobDisposition, RejectTicketInput, ResourceStateRecord, ResourceStateRepository,
    SubmittedBatch, SubmittedTicket,
};

#[derive(Default)]
struct StoreState {
    events: HashMap<DomainEventId, DomainEvent>,
    event_order: Vec<DomainEventId>,
    tickets: HashMap<TicketId, ApprovalTicket>,
    ticket_order: Vec<TicketId>,
    resource_states: HashMap<String, ResourceStateRecord>,
}

impl StoreState {
    fn insert(&mut self, submitted: &SubmittedTicket) {
        self.events
            .insert(submitted.event.id(), submitted.event.clone());
        self.event_order.push(submitted.event.id());
        self.tickets
            .insert(submitted.ticket.id, submitted.ticket.clone());
        self.ticket_order.push(submitted.ticket.id);
    }

    fn transition(&mut self, event_id: DomainEventId, target: DomainEventStatus) -> StatusTransition {
        let Some(event) = self.events.get(&event_id) else {
            return StatusTransition::Skipped;
        };
        if !event.status().can_transition_to(target) {
            return StatusTransition::Skipped;
        }

        let updated = event.clone().with_status(target);
        self.events.insert(event_id, updated);
        StatusTransition::Applied
    }

    fn children_of(&self, parent_ticket_id: TicketId) -> Vec<TicketId> {
        self.ticket_order
            .iter()
            .copied()
            .filter(|id| {
                self.tickets
                    .get(id)
                    .is_some_and(|ticket| ticket.parent_ticket_id == Some(parent_ticket_id))
            })
            .collect()
    }

    fn decide(
        &mut self,
        ticket_id: TicketId,
        status: TicketStatus,
        actor: &str,
        at: DateTime<Utc>,
        apply: impl FnOnce(&mut ApprovalTicket),
    ) -> Option<AffectedTicket> {
        let ticket = self.tickets.get_mut(&ticket_id)?;
        if ticket.status != TicketStatus::Pending {
            return None;
        }

        ticket.status = status;
        ticket.decided_at = Some(at);
        match status {
            TicketStatus::Cancelled => ticket.cancelled_by = Some(actor.to_owned()),
            _ => ticket.approver = Some(actor.to_owned()),
        }
        apply(ticket);

        let affected = AffectedTicket {
            ticket_id,
            event_id: ticket.event_id,
        };
        let cancels_event = matches!(status, TicketStatus::Rejected | TicketStatus::Cancelled)
            && !ticket.is_batch_parent();
        if cancels_event {
            self.transition(affected.event_id, DomainEventStatus::Cancelled);
        }

        Some(affected)
    }
}

/// In-memory store implementing every repository port behind one lock.
#[derive(Default)]
pub(crate) struct FakeGovernanceStore {
    state: Mutex<StoreState>,
}

impl FakeGovernanceStore {
    pub(crate) async fn event(&self, event_id: DomainEventId) -> DomainEvent {
        match self.state.lock().await.events.get(&event_id) {
            Some(event) => event.clone(),
            None => panic!("event '{event_id}' should exist"),
        }
    }

    pub(crate) async fn ticket(&self, ticket_id: TicketId) -> ApprovalTicket {
        match self.state.lock().await.tickets.get(&ticket_id) {
            Some(ticket) => ticket.clone(),
            None => panic!("ticket '{ticket_id}' should exist"),
        }
    }

    pub(crate) async fn events_of_type(&self, event_type: DomainEventType) -> Vec<DomainEvent> {
        let state = self.state.lock().await;
        state
            .event_order
            .iter()
            .filter_map(|id| state.events.get(id))
            .filter(|event| event.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub(crate) async fn resource_state(
        &self,
        identity: &ResourceIdentity,
    ) -> Option<ResourceStateRecord> {
        self.state
            .lock()
            .await
            .resource_states
            .get(&identity.key())
            .cloned()
    }

    pub(crate) async fn backdate_decisions(&self, by: Duration) {
        for ticket in self.state.lock().await.tickets.values_mut() {
            ticket.decided_at = ticket.decided_at.map(|at| at - by);
        }
    }
}

#[async_trait]
impl DomainEventRepository for FakeGovernanceStore {
    async fn record_event(&self, event: NewDomainEvent) -> AppResult<DomainEvent> {
        let event = event.into_event(DomainEventId::new(), Utc::now());
        let mut state = self.state.lock().await;
        state.events.insert(event.id(), event.clone());
        state.event_order.push(event.id());
        Ok(event)
    }

    async fn find_event(&self, event_id: DomainEventId) -> AppResult<Option<DomainEvent>> {
        Ok(self.state.lock().await.events.get(&event_id).cloned())
    }

    async fn list_events_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> AppResult<Vec<DomainEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .event_order
            .iter()
            .filter_map(|id| state.events.get(id))
            .filter(|event| {
                event.aggregate_type() == aggregate_type && event.aggregate_id() == aggregate_id
            })
            .cloned()
            .collect())
    }

    async fn set_event_status(
        &self,
        event_id: DomainEventId,
        status: DomainEventStatus,
    ) -> AppResult<StatusTransition> {
        Ok(self.state.lock().await.transition(event_id, status))
    }

    async fn archive_event(
        &self,
        event_id: DomainEventId,
        archived_at: DateTime<Utc>,
    ) -> AppResult<StatusTransition> {
        let mut state = self.state.lock().await;
        let Some(event) = state.events.get(&event_id) else {
            return Ok(StatusTransition::Skipped);
        };
        if !event.status().is_terminal() || event.archived_at().is_some() {
            return Ok(StatusTransition::Skipped);
        }

        let archived = event.clone().with_archived_at(archived_at);
        state.events.insert(event_id, archived);
        Ok(StatusTransition::Applied)
    }
}

#[async_trait]
impl ApprovalTicketRepository for FakeGovernanceStore {
    async fn insert_ticket_with_event(&self, submitted: &SubmittedTicket) -> AppResult<()> {
        self.state.lock().await.insert(submitted);
        Ok(())
    }

    async fn insert_batch(&self, batch: &SubmittedBatch) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.insert(&batch.parent);
        for child in &batch.children {
            state.insert(child);
        }
        Ok(())
    }

    async fn find_ticket(&self, ticket_id: TicketId) -> AppResult<Option<ApprovalTicket>> {
        Ok(self.state.lock().await.tickets.get(&ticket_id).cloned())
    }

    async fn approve_ticket(&self, input: ApproveTicketInput) -> AppResult<DecisionOutcome> {
        let mut state = self.state.lock().await;
        let bound = state
            .tickets
            .get(&input.ticket_id)
            .is_some_and(|ticket| ticket.event_id == input.event_id);
        if !bound {
            return Ok(DecisionOutcome::AlreadyDecided);
        }

        let overrides = input.overrides;
        let affected = state.decide(
            input.ticket_id,
            TicketStatus::Approved,
            input.approver.as_str(),
            input.decided_at,
            |ticket| ticket.overrides = overrides,
        );
        Ok(DecisionOutcome::from_rows_affected(u64::from(affected.is_some())))
    }

    async fn reject_ticket(&self, input: RejectTicketInput) -> AppResult<DecisionOutcome> {
        let mut state = self.state.lock().await;
        let bound = state
            .tickets
            .get(&input.ticket_id)
            .is_some_and(|ticket| ticket.event_id == input.event_id);
        if !bound {
            return Ok(DecisionOutcome::AlreadyDecided);
        }

        let reason = input.reason;
        let affected = state.decide(
            input.ticket_id,
            TicketStatus::Rejected,
            input.approver.as_str(),
            input.decided_at,
            |ticket| ticket.reject_reason = Some(reason),
        );
        Ok(DecisionOutcome::from_rows_affected(u64::from(affected.is_some())))
    }

    async fn cancel_ticket(
        &self,
        ticket_id: TicketId,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<DecisionOutcome> {
        let affected = self.state.lock().await.decide(
            ticket_id,
            TicketStatus::Cancelled,
            cancelled_by,
            cancelled_at,
            |_| {},
        );
        Ok(DecisionOutcome::from_rows_affected(u64::from(affected.is_some())))
    }

    async fn list_children(&self, parent_ticket_id: TicketId) -> AppResult<Vec<ChildTicketView>> {
        let state = self.state.lock().await;
        let mut children = Vec::new();
        for id in state.children_of(parent_ticket_id) {
            let Some(ticket) = state.tickets.get(&id) else {
                continue;
            };
            let event_status = state
                .events
                .get(&ticket.event_id)
                .map(DomainEvent::status)
                .ok_or_else(|| AppError::Internal(format!("ticket '{id}' lost its event")))?;
            children.push(ChildTicketView {
                ticket: ticket.clone(),
                event_status,
            });
        }
        Ok(children)
    }

    async fn decide_batch(
        &self,
        parent_ticket_id: TicketId,
        approver: &str,
        decision: BatchDecision,
        decided_at: DateTime<Utc>,
    ) -> AppResult<BatchDecisionResult> {
        let mut state = self.state.lock().await;
        let status = match decision {
            BatchDecision::Approve { .. } => TicketStatus::Approved,
            BatchDecision::Reject { .. } => TicketStatus::Rejected,
        };
        let apply = |ticket: &mut ApprovalTicket| match &decision {
            BatchDecision::Approve { overrides } => ticket.overrides = overrides.clone(),
            BatchDecision::Reject { reason } => ticket.reject_reason = Some(reason.clone()),
        };

        if state
            .decide(parent_ticket_id, status, approver, decided_at, apply)
            .is_none()
        {
            return Ok(BatchDecisionResult {
                parent: DecisionOutcome::AlreadyDecided,
                children: Vec::new(),
            });
        }

        let mut children = Vec::new();
        for id in state.children_of(parent_ticket_id) {
            if let Some(affected) = state.decide(id, status, approver, decided_at, apply) {
                children.push(affected);
            }
        }

        Ok(BatchDecisionResult {
            parent: DecisionOutcome::Applied,
            children,
        })
    }

    async fn terminate_pending_children(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<Vec<AffectedTicket>> {
        let mut state = self.state.lock().await;
        let mut terminated = Vec::new();
        for id in state.children_of(parent_ticket_id) {
            if selection.is_some_and(|selection| !selection.contains(&id)) {
                continue;
            }
            if let Some(affected) =
                state.decide(id, TicketStatus::Cancelled, cancelled_by, cancelled_at, |_| {})
            {
                terminated.push(affected);
            }
        }
        Ok(terminated)
    }

    async fn reset_failed_children(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
    ) -> AppResult<Vec<AffectedTicket>> {
        let mut state = self.state.lock().await;
        let mut reset = Vec::new();
        for id in state.children_of(parent_ticket_id) {
            if selection.is_some_and(|selection| !selection.contains(&id)) {
                continue;
            }
            let Some(ticket) = state.tickets.get(&id) else {
                continue;
            };
            if ticket.status != TicketStatus::Approved {
                continue;
            }
            let affected = AffectedTicket {
                ticket_id: id,
                event_id: ticket.event_id,
            };
            if state
                .transition(affected.event_id, DomainEventStatus::Pending)
                .is_applied()
            {
                reset.push(affected);
            }
        }

        if !reset.is_empty()
            && let Some(parent) = state.tickets.get(&parent_ticket_id)
        {
            let parent_event_id = parent.event_id;
            state.transition(parent_event_id, DomainEventStatus::Pending);
        }

        Ok(reset)
    }

    async fn count_pending_tickets_for_requester(&self, requester: &str) -> AppResult<u64> {
        let state = self.state.lock().await;
        let count = state
            .tickets
            .values()
            .filter(|ticket| {
                ticket.status == TicketStatus::Pending
                    && !ticket.is_batch_parent()
                    && ticket.requester == requester
            })
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn list_orphaned_approvals(
        &self,
        decided_before: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<AffectedTicket>> {
        let state = self.state.lock().await;
        Ok(state
            .ticket_order
            .iter()
            .filter_map(|id| state.tickets.get(id))
            .filter(|ticket| {
                ticket.status == TicketStatus::Approved
                    && !ticket.is_batch_parent()
                    && ticket.decided_at.is_some_and(|at| at < decided_before)
                    && state
                        .events
                        .get(&ticket.event_id)
                        .is_some_and(|event| event.status() == DomainEventStatus::Pending)
            })
            .take(limit)
            .map(|ticket| AffectedTicket {
                ticket_id: ticket.id,
                event_id: ticket.event_id,
            })
            .collect())
    }
}

#[async_trait]
impl ResourceStateRepository for FakeGovernanceStore {
    async fn record_resource_state(&self, record: ResourceStateRecord) -> AppResult<()> {
        self.state
            .lock()
            .await
            .resource_states
            .insert(record.identity.key(), record);
        Ok(())
    }

    async fn find_resource_state(
        &self,
        identity: &ResourceIdentity,
    ) -> AppResult<Option<ResourceStateRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .resource_states
            .get(&identity.key())
            .cloned())
    }
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<AffectedTicket>,
    enqueued: Vec<AffectedTicket>,
    completed: Vec<String>,
    failed: Vec<(String, bool)>,
    reject_enqueue: bool,
    dead_letter_on_fail: bool,
}

/// Queue fake that records every call.
#[derive(Default)]
pub(crate) struct FakeExecutionQueue {
    state: Mutex<QueueState>,
}

impl FakeExecutionQueue {
    pub(crate) async fn enqueued(&self) -> Vec<AffectedTicket> {
        self.state.lock().await.enqueued.clone()
    }

    pub(crate) async fn completed(&self) -> Vec<String> {
        self.state.lock().await.completed.clone()
    }

    pub(crate) async fn failed(&self) -> Vec<(String, bool)> {
        self.state.lock().await.failed.clone()
    }

    pub(crate) async fn reject_enqueue(&self, reject: bool) {
        self.state.lock().await.reject_enqueue = reject;
    }

    /// Makes every failure dead-letter, as a queue with a tighter budget would.
    pub(crate) async fn dead_letter_on_fail(&self, dead_letter: bool) {
        self.state.lock().await.dead_letter_on_fail = dead_letter;
    }
}

/// Builds a leased job for `affected`.
pub(crate) fn job_for(affected: AffectedTicket, attempt: u32) -> ExecutionJob {
    ExecutionJob {
        job_id: format!("job-{}", affected.event_id),
        event_id: affected.event_id,
        ticket_id: affected.ticket_id,
        attempt,
        worker_id: "worker-test".to_owned(),
        lease_token: format!("lease-{attempt}"),
    }
}

#[async_trait]
impl ExecutionQueue for FakeExecutionQueue {
    async fn enqueue(&self, event_id: DomainEventId, ticket_id: TicketId) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.reject_enqueue {
            return Err(AppError::Internal("queue unavailable".to_owned()));
        }

        let affected = AffectedTicket {
            ticket_id,
            event_id,
        };
        state.enqueued.push(affected);
        if !state.queued.contains(&affected) {
            state.queued.push_back(affected);
        }
        Ok(())
    }

    async fn claim(
        &self,
        _worker_id: &str,
        limit: usize,
        _lease_seconds: u32,
    ) -> AppResult<Vec<ExecutionJob>> {
        let mut state = self.state.lock().await;
        let count = limit.min(state.queued.len());
        Ok(state
            .queued
            .drain(..count)
            .map(|affected| job_for(affected, 1))
            .collect())
    }

    async fn complete(&self, job: &ExecutionJob) -> AppResult<()> {
        self.state.lock().await.completed.push(job.job_id.clone());
        Ok(())
    }

    async fn fail(
        &self,
        job: &ExecutionJob,
        _error_message: &str,
        retryable: bool,
        policy: ExecutionRetryPolicy,
    ) -> AppResult<JobDisposition> {
        let mut state = self.state.lock().await;
        state.failed.push((job.job_id.clone(), retryable));
        if retryable && !policy.is_exhausted(job.attempt) && !state.dead_letter_on_fail {
            return Ok(JobDisposition::RetryScheduled {
                available_at: Utc::now() + policy.retry_delay(job.attempt),
            });
        }
        Ok(JobDisposition::DeadLettered)
    }
}

/// Scripted reply of the infrastructure fake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Ok,
    AlreadyExists,
    Missing,
    Unavailable,
    Rejected,
    Crash,
}

/// Infrastructure client fake replaying scripted replies per resource name.
#[derive(Default)]
pub(crate) struct FakeInfrastructureClient {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl FakeInfrastructureClient {
    pub(crate) async fn script(&self, name: &str, replies: &[Reply]) {
        self.replies
            .lock()
            .await
            .insert(name.to_owned(), replies.iter().copied().collect());
    }

    /// Recorded `(action, cluster/namespace/name, idempotency key)` triples.
    pub(crate) async fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().await.clone()
    }

    async fn reply(&self, action: &str, identity: &ResourceIdentity, key: &str) -> AppResult<()> {
        self.calls
            .lock()
            .await
            .push((action.to_owned(), identity.key(), key.to_owned()));
        let reply = self
            .replies
            .lock()
            .await
            .get_mut(identity.name())
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Ok);

        match reply {
            Reply::Ok => Ok(()),
            Reply::AlreadyExists => Err(AppError::Conflict(format!("{identity} already exists"))),
            Reply::Missing => Err(AppError::NotFound(format!("{identity} does not exist"))),
            Reply::Unavailable => Err(AppError::External {
                retryable: true,
                message: "503 service unavailable".to_owned(),
            }),
            Reply::Rejected => Err(AppError::External {
                retryable: false,
                message: "422 quota exceeded".to_owned(),
            }),
            Reply::Crash => Err(AppError::Internal("connection reset".to_owned())),
        }
    }
}

#[async_trait]
impl InfrastructureClient for FakeInfrastructureClient {
    async fn create_resource(
        &self,
        identity: &ResourceIdentity,
        _spec: &Value,
        idempotency_key: &str,
    ) -> AppResult<()> {
        self.reply("create", identity, idempotency_key).await
    }

    async fn delete_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        self.reply("delete", identity, idempotency_key).await
    }

    async fn start_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        self.reply("start", identity, idempotency_key).await
    }

    async fn stop_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        self.reply("stop", identity, idempotency_key).await
    }

    async fn restart_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        self.reply("restart", identity, idempotency_key).await
    }
}

/// Services wired to shared fakes.
pub(crate) struct Harness {
    pub(crate) store: Arc<FakeGovernanceStore>,
    pub(crate) queue: Arc<FakeExecutionQueue>,
    pub(crate) client: Arc<FakeInfrastructureClient>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) approvals: ApprovalService,
    pub(crate) execution: ExecutionService,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_retry_policy(3)
    }

    pub(crate) fn with_retry_policy(max_attempts: u32) -> Self {
        let store = Arc::new(FakeGovernanceStore::default());
        let queue = Arc::new(FakeExecutionQueue::default());
        let client = Arc::new(FakeInfrastructureClient::default());
        let dispatcher = Arc::new(EventDispatcher::new());
        let policy = match ExecutionRetryPolicy::new(max_attempts, 5) {
            Ok(policy) => policy,
            Err(error) => panic!("policy should build: {error}"),
        };

        let approvals = ApprovalService::new(
            store.clone(),
            store.clone(),
            queue.clone(),
            Arc::clone(&dispatcher),
        );
        let execution = ExecutionService::new(
            store.clone(),
            store.clone(),
            queue.clone(),
            client.clone(),
            store.clone(),
            Arc::clone(&dispatcher),
            policy,
        );

        Self {
            store,
            queue,
            client,
            dispatcher,
            approvals,
            execution,
        }
    }

    /// Claims every queued job and executes it once.
    pub(crate) async fn drain_queue(&self) -> Vec<crate::JobOutcome> {
        let jobs = match self
            .execution
            .claim_jobs_for_worker("worker-test", 100, 30)
            .await
        {
            Ok(jobs) => jobs,
            Err(error) => panic!("claim should succeed: {error}"),
        };

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            match self.execution.execute_claimed_job(&job).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => panic!("job should execute: {error}"),
            }
        }
        outcomes
    }
}

pub(crate) fn requester() -> UserIdentity {
    UserIdentity::new("alice")
}

pub(crate) fn approver() -> UserIdentity {
    UserIdentity::new("bob")
}

pub(crate) fn identity(name: &str) -> ResourceIdentity {
    match ResourceIdentity::new("east-1", "default", name) {
        Ok(identity) => identity,
        Err(error) => panic!("identity should validate: {error}"),
    }
}
