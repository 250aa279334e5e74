use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use tollgate_application::{
    AffectedTicket, ApprovalTicketRepository, ApproveTicketInput, BatchDecision,
    BatchDecisionResult, ChildTicketView, RejectTicketInput, SubmittedBatch, SubmittedTicket,
};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{
    ApprovalTicket, DecisionOutcome, DecisionOverrides, DomainEvent, DomainEventId,
    DomainEventStatus, OperationType, TicketId, TicketStatus,
};

mod batch;
mod decisions;

#[cfg(test)]
mod tests;

/// PostgreSQL-backed approval ticket repository.
///
/// Every decision is one conditional `UPDATE ... WHERE status = 'PENDING'`;
/// the affected row count tells the caller whether it won the race.
#[derive(Clone)]
pub struct PostgresApprovalTicketRepository {
    pool: PgPool,
}

impl PostgresApprovalTicketRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: uuid::Uuid,
    event_id: uuid::Uuid,
    operation_type: String,
    status: String,
    requester: String,
    approver: Option<String>,
    reason: Option<String>,
    reject_reason: Option<String>,
    cancelled_by: Option<String>,
    selected_cluster: Option<String>,
    selected_spec: Option<Value>,
    parent_ticket_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct ChildTicketRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    event_status: String,
}

#[derive(Debug, FromRow)]
struct AffectedTicketRow {
    ticket_id: uuid::Uuid,
    event_id: uuid::Uuid,
}

#[async_trait]
impl ApprovalTicketRepository for PostgresApprovalTicketRepository {
    async fn insert_ticket_with_event(&self, submitted: &SubmittedTicket) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start ticket insert transaction: {error}"))
        })?;

        insert_submitted(&mut *transaction, submitted).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit ticket '{}': {error}",
                submitted.ticket.id
            ))
        })
    }

    async fn insert_batch(&self, batch: &SubmittedBatch) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start batch insert transaction: {error}"))
        })?;

        insert_submitted(&mut *transaction, &batch.parent).await?;
        for child in &batch.children {
            insert_submitted(&mut *transaction, child).await?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit batch '{}' with {} children: {error}",
                batch.parent.ticket.id,
                batch.children.len()
            ))
        })
    }

    async fn find_ticket(&self, ticket_id: TicketId) -> AppResult<Option<ApprovalTicket>> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT
                id,
                event_id,
                operation_type,
                status,
                requester,
                approver,
                reason,
                reject_reason,
                cancelled_by,
                selected_cluster,
                selected_spec,
                parent_ticket_id,
                created_at,
                decided_at
            FROM approval_tickets
            WHERE id = $1
            "#,
        )
        .bind(ticket_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load ticket '{ticket_id}': {error}"))
        })?;

        row.map(ticket_from_row).transpose()
    }

    async fn approve_ticket(&self, input: ApproveTicketInput) -> AppResult<DecisionOutcome> {
        self.approve_ticket_impl(input).await
    }

    async fn reject_ticket(&self, input: RejectTicketInput) -> AppResult<DecisionOutcome> {
        self.reject_ticket_impl(input).await
    }

    async fn cancel_ticket(
        &self,
        ticket_id: TicketId,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<DecisionOutcome> {
        self.cancel_ticket_impl(ticket_id, cancelled_by, cancelled_at)
            .await
    }

    async fn list_children(&self, parent_ticket_id: TicketId) -> AppResult<Vec<ChildTicketView>> {
        self.list_children_impl(parent_ticket_id).await
    }

    async fn decide_batch(
        &self,
        parent_ticket_id: TicketId,
        approver: &str,
        decision: BatchDecision,
        decided_at: DateTime<Utc>,
    ) -> AppResult<BatchDecisionResult> {
        self.decide_batch_impl(parent_ticket_id, approver, decision, decided_at)
            .await
    }

    async fn terminate_pending_children(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<Vec<AffectedTicket>> {
        self.terminate_pending_children_impl(parent_ticket_id, selection, cancelled_by, cancelled_at)
            .await
    }

    async fn reset_failed_children(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
    ) -> AppResult<Vec<AffectedTicket>> {
        self.reset_failed_children_impl(parent_ticket_id, selection)
            .await
    }

    async fn count_pending_tickets_for_requester(&self, requester: &str) -> AppResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM approval_tickets
            WHERE requester = $1
              AND status = 'PENDING'
              AND operation_type NOT LIKE 'BATCH\_%'
            "#,
        )
        .bind(requester)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to count pending tickets for '{requester}': {error}"
            ))
        })?;

        u64::try_from(count)
            .map_err(|error| AppError::Internal(format!("invalid pending ticket count: {error}")))
    }

    async fn list_orphaned_approvals(
        &self,
        decided_before: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<AffectedTicket>> {
        let rows = sqlx::query_as::<_, AffectedTicketRow>(
            r#"
            SELECT tickets.id AS ticket_id, tickets.event_id
            FROM approval_tickets tickets
            INNER JOIN domain_events events
                ON events.id = tickets.event_id
            WHERE tickets.status = 'APPROVED'
              AND tickets.operation_type NOT LIKE 'BATCH\_%'
              AND tickets.decided_at < $1
              AND events.status = 'pending'
            ORDER BY tickets.decided_at ASC
            LIMIT $2
            "#,
        )
        .bind(decided_before)
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid orphaned approval limit: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list orphaned approvals: {error}"))
        })?;

        Ok(rows.into_iter().map(affected_from_row).collect())
    }
}

async fn insert_submitted(
    connection: &mut PgConnection,
    submitted: &SubmittedTicket,
) -> AppResult<()> {
    insert_event(connection, &submitted.event).await?;
    insert_ticket(connection, &submitted.ticket).await
}

async fn insert_event(connection: &mut PgConnection, event: &DomainEvent) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO domain_events (
            id,
            event_type,
            aggregate_type,
            aggregate_id,
            payload,
            status,
            created_by,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(event.id().as_uuid())
    .bind(event.event_type().as_str())
    .bind(event.aggregate_type().as_str())
    .bind(event.aggregate_id())
    .bind(event.payload())
    .bind(event.status().as_str())
    .bind(event.created_by())
    .bind(event.created_at())
    .execute(&mut *connection)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to insert domain event '{}': {error}",
            event.id()
        ))
    })?;

    Ok(())
}

async fn insert_ticket(connection: &mut PgConnection, ticket: &ApprovalTicket) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO approval_tickets (
            id,
            event_id,
            operation_type,
            status,
            requester,
            reason,
            parent_ticket_id,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(ticket.id.as_uuid())
    .bind(ticket.event_id.as_uuid())
    .bind(ticket.operation_type.as_str())
    .bind(ticket.status.as_str())
    .bind(ticket.requester.as_str())
    .bind(ticket.reason.as_deref())
    .bind(ticket.parent_ticket_id.map(|id| id.as_uuid()))
    .bind(ticket.created_at)
    .execute(&mut *connection)
    .await
    .map_err(|error| {
        if is_unique_violation(&error) {
            AppError::Conflict(format!(
                "event '{}' is already bound to a ticket",
                ticket.event_id
            ))
        } else {
            AppError::Internal(format!("failed to insert ticket '{}': {error}", ticket.id))
        }
    })?;

    Ok(())
}

/// Moves ticket events from `pending` to `cancelled`.
async fn cancel_pending_events(
    connection: &mut PgConnection,
    event_ids: &[uuid::Uuid],
) -> AppResult<()> {
    if event_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE domain_events
        SET status = 'cancelled'
        WHERE id = ANY($1)
          AND status = 'pending'
        "#,
    )
    .bind(event_ids)
    .execute(&mut *connection)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to cancel events of {} decided tickets: {error}",
            event_ids.len()
        ))
    })?;

    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|database_error| database_error.is_unique_violation())
}

fn selection_uuids(selection: Option<&[TicketId]>) -> Option<Vec<uuid::Uuid>> {
    selection.map(|ids| ids.iter().map(TicketId::as_uuid).collect())
}

fn affected_from_row(row: AffectedTicketRow) -> AffectedTicket {
    AffectedTicket {
        ticket_id: TicketId::from_uuid(row.ticket_id),
        event_id: DomainEventId::from_uuid(row.event_id),
    }
}

fn ticket_from_row(row: TicketRow) -> AppResult<ApprovalTicket> {
    Ok(ApprovalTicket {
        id: TicketId::from_uuid(row.id),
        event_id: DomainEventId::from_uuid(row.event_id),
        operation_type: OperationType::parse(row.operation_type.as_str())?,
        status: TicketStatus::parse(row.status.as_str())?,
        requester: row.requester,
        approver: row.approver,
        reason: row.reason,
        reject_reason: row.reject_reason,
        cancelled_by: row.cancelled_by,
        overrides: DecisionOverrides {
            selected_cluster: row.selected_cluster,
            selected_spec: row.selected_spec,
        },
        parent_ticket_id: row.parent_ticket_id.map(TicketId::from_uuid),
        created_at: row.created_at,
        decided_at: row.decided_at,
    })
}

fn child_from_row(row: ChildTicketRow) -> AppResult<ChildTicketView> {
    Ok(ChildTicketView {
        event_status: DomainEventStatus::parse(row.event_status.as_str())?,
        ticket: ticket_from_row(row.ticket)?,
    })
}
