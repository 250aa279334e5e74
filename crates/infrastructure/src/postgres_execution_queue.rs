use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tollgate_application::{ExecutionJob, ExecutionQueue, ExecutionRetryPolicy, JobDisposition};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{DomainEventId, TicketId};

/// PostgreSQL-backed durable execution queue.
///
/// One job row per request event. Claims lease rows with
/// `FOR UPDATE SKIP LOCKED`; completion and failure are fenced by worker id
/// and lease token, so a worker whose lease expired cannot settle a job that
/// someone else reclaimed.
#[derive(Clone)]
pub struct PostgresExecutionQueue {
    pool: PgPool,
}

impl PostgresExecutionQueue {
    /// Creates a queue adapter with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ClaimedJobRow {
    job_id: uuid::Uuid,
    event_id: uuid::Uuid,
    ticket_id: uuid::Uuid,
    attempt: i32,
    lease_token: String,
}

#[async_trait]
impl ExecutionQueue for PostgresExecutionQueue {
    async fn enqueue(&self, event_id: DomainEventId, ticket_id: TicketId) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_jobs (
                event_id,
                ticket_id,
                status,
                attempt,
                available_at,
                created_at,
                updated_at
            )
            VALUES ($1, $2, 'pending', 0, now(), now(), now())
            ON CONFLICT (event_id)
            DO UPDATE SET
                status = 'pending',
                attempt = 0,
                available_at = now(),
                leased_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                last_error = NULL,
                updated_at = now()
            WHERE execution_jobs.status IN ('completed', 'dead_lettered')
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(ticket_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to enqueue event '{event_id}' for ticket '{ticket_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        lease_seconds: u32,
    ) -> AppResult<Vec<ExecutionJob>> {
        if worker_id.trim().is_empty() {
            return Err(AppError::Validation(
                "execution worker_id must not be empty".to_owned(),
            ));
        }

        if limit == 0 || lease_seconds == 0 {
            return Ok(Vec::new());
        }

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start execution job claim transaction: {error}"
            ))
        })?;

        let claim_rows = sqlx::query_as::<_, ClaimedJobRow>(
            r#"
            WITH candidate_jobs AS (
                SELECT id
                FROM execution_jobs
                WHERE (status = 'pending' AND available_at <= now())
                   OR (status = 'leased' AND lease_expires_at < now())
                ORDER BY available_at ASC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ),
            leased_jobs AS (
                UPDATE execution_jobs jobs
                SET
                    status = 'leased',
                    attempt = jobs.attempt + 1,
                    leased_by = $2,
                    lease_token = gen_random_uuid()::TEXT,
                    lease_expires_at = now() + make_interval(secs => $3::INT),
                    updated_at = now()
                FROM candidate_jobs
                WHERE jobs.id = candidate_jobs.id
                RETURNING
                    jobs.id,
                    jobs.event_id,
                    jobs.ticket_id,
                    jobs.attempt,
                    jobs.lease_token,
                    jobs.created_at
            )
            SELECT
                id AS job_id,
                event_id,
                ticket_id,
                attempt,
                lease_token
            FROM leased_jobs
            ORDER BY created_at ASC
            "#,
        )
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid execution claim limit: {error}"))
        })?)
        .bind(worker_id)
        .bind(i32::try_from(lease_seconds).map_err(|error| {
            AppError::Validation(format!("invalid execution lease_seconds: {error}"))
        })?)
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to claim execution jobs for worker '{worker_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit execution job claim transaction: {error}"
            ))
        })?;

        claim_rows
            .into_iter()
            .map(|row| claimed_job_from_row(row, worker_id))
            .collect()
    }

    async fn complete(&self, job: &ExecutionJob) -> AppResult<()> {
        let job_uuid = parse_job_id(job.job_id.as_str())?;

        let result = sqlx::query(
            r#"
            UPDATE execution_jobs
            SET
                status = 'completed',
                leased_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND leased_by = $2
              AND lease_token = $3
              AND status = 'leased'
            "#,
        )
        .bind(job_uuid)
        .bind(job.worker_id.as_str())
        .bind(job.lease_token.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to complete execution job '{}' for worker '{}': {error}",
                job.job_id, job.worker_id
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(lease_lost(job));
        }

        Ok(())
    }

    async fn fail(
        &self,
        job: &ExecutionJob,
        error_message: &str,
        retryable: bool,
        policy: ExecutionRetryPolicy,
    ) -> AppResult<JobDisposition> {
        let job_uuid = parse_job_id(job.job_id.as_str())?;
        let retry_at: Option<DateTime<Utc>> = (retryable && !policy.is_exhausted(job.attempt))
            .then(|| Utc::now() + policy.retry_delay(job.attempt));

        let result = sqlx::query(
            r#"
            UPDATE execution_jobs
            SET
                status = CASE WHEN $4::TIMESTAMPTZ IS NULL THEN 'dead_lettered' ELSE 'pending' END,
                available_at = COALESCE($4, available_at),
                leased_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                last_error = $5,
                updated_at = now()
            WHERE id = $1
              AND leased_by = $2
              AND lease_token = $3
              AND status = 'leased'
            "#,
        )
        .bind(job_uuid)
        .bind(job.worker_id.as_str())
        .bind(job.lease_token.as_str())
        .bind(retry_at)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to mark execution job '{}' as failed for worker '{}': {error}",
                job.job_id, job.worker_id
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(lease_lost(job));
        }

        Ok(match retry_at {
            Some(available_at) => JobDisposition::RetryScheduled { available_at },
            None => JobDisposition::DeadLettered,
        })
    }
}

fn parse_job_id(job_id: &str) -> AppResult<uuid::Uuid> {
    uuid::Uuid::parse_str(job_id).map_err(|error| {
        AppError::Validation(format!("invalid execution job id '{job_id}': {error}"))
    })
}

fn lease_lost(job: &ExecutionJob) -> AppError {
    AppError::Conflict(format!(
        "execution job '{}' is not currently leased by worker '{}' with matching lease token",
        job.job_id, job.worker_id
    ))
}

fn claimed_job_from_row(row: ClaimedJobRow, worker_id: &str) -> AppResult<ExecutionJob> {
    Ok(ExecutionJob {
        job_id: row.job_id.to_string(),
        event_id: DomainEventId::from_uuid(row.event_id),
        ticket_id: TicketId::from_uuid(row.ticket_id),
        attempt: u32::try_from(row.attempt).map_err(|error| {
            AppError::Internal(format!(
                "invalid attempt counter on execution job '{}': {error}",
                row.job_id
            ))
        })?,
        worker_id: worker_id.to_owned(),
        lease_token: row.lease_token,
    })
}
