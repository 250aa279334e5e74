use super::*;

#[derive(Debug, FromRow)]
struct DecidedTicketRow {
    event_id: uuid::Uuid,
    operation_type: String,
}

impl PostgresApprovalTicketRepository {
    pub(super) async fn approve_ticket_impl(
        &self,
        input: ApproveTicketInput,
    ) -> AppResult<DecisionOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE approval_tickets
            SET
                status = 'APPROVED',
                approver = $3,
                selected_cluster = $4,
                selected_spec = $5,
                decided_at = $6
            WHERE id = $1
              AND event_id = $2
              AND status = 'PENDING'
            "#,
        )
        .bind(input.ticket_id.as_uuid())
        .bind(input.event_id.as_uuid())
        .bind(input.approver.as_str())
        .bind(input.overrides.selected_cluster.as_deref())
        .bind(input.overrides.selected_spec.as_ref())
        .bind(input.decided_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to approve ticket '{}': {error}",
                input.ticket_id
            ))
        })?;

        Ok(DecisionOutcome::from_rows_affected(result.rows_affected()))
    }

    pub(super) async fn reject_ticket_impl(
        &self,
        input: RejectTicketInput,
    ) -> AppResult<DecisionOutcome> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start ticket reject transaction: {error}"))
        })?;

        let decided = sqlx::query_as::<_, DecidedTicketRow>(
            r#"
            UPDATE approval_tickets
            SET
                status = 'REJECTED',
                approver = $3,
                reject_reason = $4,
                decided_at = $5
            WHERE id = $1
              AND event_id = $2
              AND status = 'PENDING'
            RETURNING event_id, operation_type
            "#,
        )
        .bind(input.ticket_id.as_uuid())
        .bind(input.event_id.as_uuid())
        .bind(input.approver.as_str())
        .bind(input.reason.as_str())
        .bind(input.decided_at)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to reject ticket '{}': {error}",
                input.ticket_id
            ))
        })?;

        let outcome = settle_decided_event(&mut *transaction, decided).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit rejection of ticket '{}': {error}",
                input.ticket_id
            ))
        })?;

        Ok(outcome)
    }

    pub(super) async fn cancel_ticket_impl(
        &self,
        ticket_id: TicketId,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<DecisionOutcome> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start ticket cancel transaction: {error}"))
        })?;

        let decided = sqlx::query_as::<_, DecidedTicketRow>(
            r#"
            UPDATE approval_tickets
            SET
                status = 'CANCELLED',
                cancelled_by = $2,
                decided_at = $3
            WHERE id = $1
              AND status = 'PENDING'
            RETURNING event_id, operation_type
            "#,
        )
        .bind(ticket_id.as_uuid())
        .bind(cancelled_by)
        .bind(cancelled_at)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to cancel ticket '{ticket_id}': {error}"))
        })?;

        let outcome = settle_decided_event(&mut *transaction, decided).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit cancellation of ticket '{ticket_id}': {error}"
            ))
        })?;

        Ok(outcome)
    }
}

/// Cancels the event of a rejected or cancelled ticket.
///
/// A batch parent's summary event is left alone; it settles once the batch
/// resolves.
async fn settle_decided_event(
    connection: &mut PgConnection,
    decided: Option<DecidedTicketRow>,
) -> AppResult<DecisionOutcome> {
    let Some(decided) = decided else {
        return Ok(DecisionOutcome::AlreadyDecided);
    };

    if !OperationType::parse(decided.operation_type.as_str())?.is_batch() {
        cancel_pending_events(connection, &[decided.event_id]).await?;
    }

    Ok(DecisionOutcome::Applied)
}
