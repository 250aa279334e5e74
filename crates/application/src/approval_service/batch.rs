use super::*;

impl ApprovalService {
    /// Returns the batch summary, recomputed from its children.
    pub async fn batch_status(&self, parent_ticket_id: TicketId) -> AppResult<BatchSummary> {
        self.resolver.resolve(parent_ticket_id).await
    }

    /// Approves a batch parent and every still pending child in one transaction.
    pub async fn approve_batch(
        &self,
        actor: &UserIdentity,
        parent_ticket_id: TicketId,
        overrides: DecisionOverrides,
    ) -> AppResult<BatchDecisionReport> {
        let parent = self.resolver.find_parent(parent_ticket_id).await?;
        overrides.validate_for(parent.operation_type)?;

        let result = self
            .tickets
            .decide_batch(
                parent_ticket_id,
                actor.subject(),
                BatchDecision::Approve { overrides },
                Utc::now(),
            )
            .await?;

        if result.parent.is_applied() {
            info!(
                parent_ticket_id = %parent_ticket_id,
                approver = actor.subject(),
                children = result.children.len(),
                "batch approved"
            );
            for child in &result.children {
                self.enqueue_after_commit(*child).await;
            }
            self.resolver.resolve(parent_ticket_id).await?;
        }

        Ok(result)
    }

    /// Rejects a batch parent and every still pending child in one transaction.
    pub async fn reject_batch(
        &self,
        actor: &UserIdentity,
        parent_ticket_id: TicketId,
        reason: &str,
    ) -> AppResult<BatchDecisionReport> {
        let reason = require_reason(reason)?;
        self.resolver.find_parent(parent_ticket_id).await?;

        let result = self
            .tickets
            .decide_batch(
                parent_ticket_id,
                actor.subject(),
                BatchDecision::Reject { reason },
                Utc::now(),
            )
            .await?;

        if result.parent.is_applied() {
            info!(
                parent_ticket_id = %parent_ticket_id,
                approver = actor.subject(),
                children = result.children.len(),
                "batch rejected"
            );
            self.resolver.resolve(parent_ticket_id).await?;
        }

        Ok(result)
    }

    /// Re-queues failed children, optionally restricted to `selection`.
    ///
    /// Only approved children whose event failed are affected.
    pub async fn retry_failed(
        &self,
        actor: &UserIdentity,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
    ) -> AppResult<Vec<AffectedTicket>> {
        self.resolver.find_parent(parent_ticket_id).await?;

        let reset = self
            .tickets
            .reset_failed_children(parent_ticket_id, selection)
            .await?;

        info!(
            parent_ticket_id = %parent_ticket_id,
            requested_by = actor.subject(),
            retried = reset.len(),
            "failed batch children re-queued"
        );
        for child in &reset {
            self.enqueue_after_commit(*child).await;
        }

        Ok(reset)
    }

    /// Cancels pending children, optionally restricted to `selection`.
    ///
    /// Children past the decision point are reported as not cancellable.
    pub async fn terminate_pending(
        &self,
        actor: &UserIdentity,
        parent_ticket_id: TicketId,
        selection: Option<&[TicketId]>,
    ) -> AppResult<TerminationReport> {
        self.resolver.find_parent(parent_ticket_id).await?;
        let children = self.tickets.list_children(parent_ticket_id).await?;

        let requested: Vec<TicketId> = match selection {
            Some(selection) => {
                let known: HashSet<TicketId> =
                    children.iter().map(|child| child.ticket.id).collect();
                if let Some(unknown) = selection.iter().find(|id| !known.contains(id)) {
                    return Err(AppError::Validation(format!(
                        "ticket '{unknown}' is not a child of batch '{parent_ticket_id}'"
                    )));
                }
                selection.to_vec()
            }
            None => children.iter().map(|child| child.ticket.id).collect(),
        };

        let terminated = self
            .tickets
            .terminate_pending_children(parent_ticket_id, selection, actor.subject(), Utc::now())
            .await?;
        let not_cancellable = not_cancellable(requested, &terminated);

        info!(
            parent_ticket_id = %parent_ticket_id,
            requested_by = actor.subject(),
            terminated = terminated.len(),
            "pending batch children terminated"
        );
        self.resolver.resolve(parent_ticket_id).await?;

        Ok(TerminationReport {
            terminated,
            not_cancellable,
        })
    }
}
