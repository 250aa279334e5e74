use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{DomainEventId, TicketId};

/// Execution job leased by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionJob {
    /// Job identifier.
    pub job_id: String,
    /// Event carrying the operation to execute.
    pub event_id: DomainEventId,
    /// Approved ticket gating the event.
    pub ticket_id: TicketId,
    /// One-based attempt number of this lease.
    pub attempt: u32,
    /// Worker holding the lease.
    pub worker_id: String,
    /// Lease token used for fencing completion and failure writes.
    pub lease_token: String,
}

/// Retry policy applied when a job attempt fails with a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRetryPolicy {
    max_attempts: u32,
    backoff_seconds: u32,
}

impl ExecutionRetryPolicy {
    /// Creates a validated retry policy.
    pub fn new(max_attempts: u32, backoff_seconds: u32) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Validation(
                "max_attempts must be greater than zero".to_owned(),
            ));
        }

        if backoff_seconds == 0 {
            return Err(AppError::Validation(
                "backoff_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            max_attempts,
            backoff_seconds,
        })
    }

    /// Returns the attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true once `attempt` used the last allowed try.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Linear backoff: the n-th failed attempt waits n times the base delay.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::seconds(i64::from(self.backoff_seconds) * i64::from(attempt.max(1)))
    }
}

/// Where a failed job went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Job returns to the queue once `available_at` passes.
    RetryScheduled {
        /// Earliest time the job can be claimed again.
        available_at: DateTime<Utc>,
    },
    /// Job stops retrying.
    DeadLettered,
}

/// Durable at-least-once queue of approved operations.
#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Enqueues execution of `event_id`.
    ///
    /// Idempotent per event: a queued or leased job is left alone, a finished
    /// job is re-armed.
    async fn enqueue(&self, event_id: DomainEventId, ticket_id: TicketId) -> AppResult<()>;

    /// Leases up to `limit` pending or lease-expired jobs.
    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ExecutionJob>>;

    /// Marks a leased job completed. Fails with `Conflict` when the lease was lost.
    async fn complete(&self, job: &ExecutionJob) -> AppResult<()>;

    /// Records a failed attempt; retryable failures go back to the queue until
    /// the policy's attempt budget is spent.
    async fn fail(
        &self,
        job: &ExecutionJob,
        error_message: &str,
        retryable: bool,
        policy: ExecutionRetryPolicy,
    ) -> AppResult<JobDisposition>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::ExecutionRetryPolicy;

    #[test]
    fn backoff_grows_linearly_with_attempts() {
        let Ok(policy) = ExecutionRetryPolicy::new(5, 10) else {
            panic!("policy should build");
        };

        assert_eq!(policy.retry_delay(1), Duration::seconds(10));
        assert_eq!(policy.retry_delay(3), Duration::seconds(30));
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        assert!(ExecutionRetryPolicy::new(0, 10).is_err());
        assert!(ExecutionRetryPolicy::new(3, 0).is_err());
    }
}
