use super::*;

struct DecisionColumns<'a> {
    status: TicketStatus,
    reject_reason: Option<&'a str>,
    selected_cluster: Option<&'a str>,
    selected_spec: Option<&'a Value>,
}

impl<'a> DecisionColumns<'a> {
    fn from_decision(decision: &'a BatchDecision) -> Self {
        match decision {
            BatchDecision::Approve { overrides } => Self {
                status: TicketStatus::Approved,
                reject_reason: None,
                selected_cluster: overrides.selected_cluster.as_deref(),
                selected_spec: overrides.selected_spec.as_ref(),
            },
            BatchDecision::Reject { reason } => Self {
                status: TicketStatus::Rejected,
                reject_reason: Some(reason.as_str()),
                selected_cluster: None,
                selected_spec: None,
            },
        }
    }
}

impl PostgresApprovalTicketRepository {
    pub(super) async fn list_children_impl(
        &self,
        parent_ticket_id: TicketId,
    ) -> AppResult<Vec<ChildTicketView>> {
        let rows = sqlx::query_as::<_, ChildTicketRow>(
            r#"
            SELECT
                tickets.id,
                tickets.event_id,
                tickets.operation_type,
                tickets.status,
                tickets.requester,
                tickets.approver,
                tickets.reason,
                tickets.reject_reason,
                tickets.cancelled_by,
                tickets.selected_cluster,
                tickets.selected_spec,
                tickets.parent_ticket_id,
                tickets.created_at,
                tickets.decided_at,
                events.status AS event_status
            FROM approval_tickets tickets
            INNER JOIN domain_events events
                ON events.id = tickets.event_id
            WHERE tickets.parent_ticket_id = $1
            ORDER BY tickets.position ASC
            "#,
        )
        .bind(parent_ticket_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list children of batch '{parent_ticket_id}': {error}"
            ))
        })?;

        rows.into_iter().map(child_from_row).collect()
    }

    pub(super) async fn decide_batch_impl(
        &self,
        parent_ticket_id: TicketId,
        approver: &str,
        decision: BatchDecision,
        decided_at: DateTime<Utc>,
    ) -> AppResult<BatchDecisionResult> {
        let columns = DecisionColumns::from_decision(&decision);
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start batch decision transaction: {error}"))
        })?;

        let parent = sqlx::query(
            r#"
            UPDATE approval_tickets
            SET
                status = $2,
                approver = $3,
                reject_reason = $4,
                selected_cluster = $5,
                selected_spec = $6,
                decided_at = $7
            WHERE id = $1
              AND status = 'PENDING'
              AND operation_type LIKE 'BATCH\_%'
            "#,
        )
        .bind(parent_ticket_id.as_uuid())
        .bind(columns.status.as_str())
        .bind(approver)
        .bind(columns.reject_reason)
        .bind(columns.selected_cluster)
        .bind(columns.selected_spec)
        .bind(decided_at)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to decide batch '{parent_ticket_id}': {error}"
            ))
        })?;

        let parent = DecisionOutcome::from_rows_affected(parent.rows_affected());
        if !parent.is_applied() {
            return Ok(BatchDecisionResult {
                parent,
                children: Vec::new(),
            });
        }

        let children = sqlx::query_as::<_, AffectedTicketRow>(
            r#"
            WITH decided_children AS (
                UPDATE approval_tickets
                SET
                    status = $2,
                    approver = $3,
                    reject_reason = $4,
                    selected_cluster = $5,
                    selected_spec = $6,
                    decided_at = $7
                WHERE parent_ticket_id = $1
                  AND status = 'PENDING'
                RETURNING id, event_id, position
            )
            SELECT id AS ticket_id, event_id
            FROM decided_children
            ORDER BY position ASC
            "#,
        )
        .bind(parent_ticket_id.as_uuid())
        .bind(columns.status.as_str())
        .bind(approver)
        .bind(columns.reject_reason)
        .bind(columns.selected_cluster)
        .bind(columns.selected_spec)
        .bind(decided_at)
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to decide children of batch '{parent_ticket_id}': {error}"
            ))
        })?;

        if columns.status == TicketStatus::Rejected {
            let event_ids: Vec<uuid::Uuid> = children.iter().map(|row| row.event_id).collect();
            cancel_pending_events(&mut *transaction, &event_ids).await?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit decision of batch '{parent_ticket_id}': {error}"
            ))
        })?;

        Ok(BatchDecisionResult {
            parent,
            children: children.into_iter().map(affected_from_row).collect(),
        })
    }

    pub(super) async fn terminate_pending_children_impl(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
        cancelled_by: &str,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<Vec<AffectedTicket>> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start batch termination transaction: {error}"
            ))
        })?;

        let terminated = sqlx::query_as::<_, AffectedTicketRow>(
            r#"
            WITH terminated_children AS (
                UPDATE approval_tickets
                SET
                    status = 'CANCELLED',
                    cancelled_by = $2,
                    decided_at = $3
                WHERE parent_ticket_id = $1
                  AND status = 'PENDING'
                  AND ($4::UUID[] IS NULL OR id = ANY($4))
                RETURNING id, event_id, position
            )
            SELECT id AS ticket_id, event_id
            FROM terminated_children
            ORDER BY position ASC
            "#,
        )
        .bind(parent_ticket_id.as_uuid())
        .bind(cancelled_by)
        .bind(cancelled_at)
        .bind(selection_uuids(selection))
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to terminate children of batch '{parent_ticket_id}': {error}"
            ))
        })?;

        let event_ids: Vec<uuid::Uuid> = terminated.iter().map(|row| row.event_id).collect();
        cancel_pending_events(&mut *transaction, &event_ids).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit termination of batch '{parent_ticket_id}': {error}"
            ))
        })?;

        Ok(terminated.into_iter().map(affected_from_row).collect())
    }

    pub(super) async fn reset_failed_children_impl(
        &self,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
    ) -> AppResult<Vec<AffectedTicket>> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start batch retry transaction: {error}"))
        })?;

        let reset = sqlx::query_as::<_, AffectedTicketRow>(
            r#"
            WITH reset_events AS (
                UPDATE domain_events events
                SET status = 'pending'
                FROM approval_tickets tickets
                WHERE tickets.event_id = events.id
                  AND tickets.parent_ticket_id = $1
                  AND tickets.status = 'APPROVED'
                  AND events.status = 'failed'
                  AND ($2::UUID[] IS NULL OR tickets.id = ANY($2))
                RETURNING tickets.id AS ticket_id, events.id AS event_id, tickets.position
            )
            SELECT ticket_id, event_id
            FROM reset_events
            ORDER BY position ASC
            "#,
        )
        .bind(parent_ticket_id.as_uuid())
        .bind(selection_uuids(selection))
        .fetch_all(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to reset failed children of batch '{parent_ticket_id}': {error}"
            ))
        })?;

        if !reset.is_empty() {
            sqlx::query(
                r#"
                UPDATE domain_events events
                SET status = 'pending'
                FROM approval_tickets parents
                WHERE parents.id = $1
                  AND events.id = parents.event_id
                  AND events.status = 'failed'
                "#,
            )
            .bind(parent_ticket_id.as_uuid())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to reopen summary event of batch '{parent_ticket_id}': {error}"
                ))
            })?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit retry of batch '{parent_ticket_id}': {error}"
            ))
        })?;

        Ok(reset.into_iter().map(affected_from_row).collect())
    }
}
