use super::*;

impl ApprovalService {
    /// Approves one pending ticket.
    ///
    /// Exactly one concurrent caller gets `Applied`; that caller enqueues
    /// execution once the decision committed. Batch parents are decided
    /// through [`ApprovalService::approve_batch`].
    pub async fn approve(
        &self,
        actor: &UserIdentity,
        request: ApproveTicketRequest,
    ) -> AppResult<DecisionOutcome> {
        let ticket = self.find_ticket(request.ticket_id).await?;
        if ticket.is_batch_parent() {
            return Err(AppError::Validation(format!(
                "ticket '{}' is a batch parent; approve it as a batch",
                ticket.id
            )));
        }
        request.overrides.validate_for(ticket.operation_type)?;

        let outcome = self
            .tickets
            .approve_ticket(ApproveTicketInput {
                ticket_id: request.ticket_id,
                event_id: request.event_id,
                approver: actor.subject().to_owned(),
                overrides: request.overrides,
                decided_at: Utc::now(),
            })
            .await?;

        match outcome {
            DecisionOutcome::Applied => {
                info!(
                    ticket_id = %request.ticket_id,
                    event_id = %request.event_id,
                    approver = actor.subject(),
                    "ticket approved"
                );
                self.enqueue_after_commit(AffectedTicket {
                    ticket_id: request.ticket_id,
                    event_id: request.event_id,
                })
                .await;
            }
            DecisionOutcome::AlreadyDecided => {
                info!(
                    ticket_id = %request.ticket_id,
                    approver = actor.subject(),
                    "ticket no longer pending"
                );
            }
        }

        Ok(outcome)
    }

    /// Rejects one pending ticket and cancels its event.
    pub async fn reject(
        &self,
        actor: &UserIdentity,
        request: RejectTicketRequest,
    ) -> AppResult<DecisionOutcome> {
        let reason = require_reason(&request.reason)?;
        let ticket = self.find_ticket(request.ticket_id).await?;
        if ticket.is_batch_parent() {
            return Err(AppError::Validation(format!(
                "ticket '{}' is a batch parent; reject it as a batch",
                ticket.id
            )));
        }

        let outcome = self
            .tickets
            .reject_ticket(RejectTicketInput {
                ticket_id: request.ticket_id,
                event_id: request.event_id,
                approver: actor.subject().to_owned(),
                reason,
                decided_at: Utc::now(),
            })
            .await?;

        if outcome.is_applied() {
            info!(
                ticket_id = %request.ticket_id,
                approver = actor.subject(),
                "ticket rejected"
            );
            self.resolver.resolve_parent_of(&ticket).await;
        }

        Ok(outcome)
    }

    /// Withdraws a pending ticket.
    ///
    /// Under [`CancelAuthority::Requester`] only the requester may cancel.
    /// Cancelling a batch parent also terminates every pending child; the
    /// report lists the children that were already past the decision point.
    pub async fn cancel(
        &self,
        actor: &UserIdentity,
        ticket_id: TicketId,
        authority: CancelAuthority,
    ) -> AppResult<CancelReport> {
        let ticket = self.find_ticket(ticket_id).await?;
        if authority == CancelAuthority::Requester && ticket.requester != actor.subject() {
            return Err(AppError::Forbidden(format!(
                "only the requester may cancel ticket '{ticket_id}'"
            )));
        }

        let now = Utc::now();
        let outcome = self
            .tickets
            .cancel_ticket(ticket_id, actor.subject(), now)
            .await?;
        if !outcome.is_applied() {
            return Ok(CancelReport {
                outcome,
                children: TerminationReport::default(),
            });
        }

        info!(
            ticket_id = %ticket_id,
            cancelled_by = actor.subject(),
            elevated = authority == CancelAuthority::Elevated,
            "ticket cancelled"
        );

        if !ticket.is_batch_parent() {
            self.resolver.resolve_parent_of(&ticket).await;
            return Ok(CancelReport {
                outcome,
                children: TerminationReport::default(),
            });
        }

        let terminated = self
            .tickets
            .terminate_pending_children(ticket_id, None, actor.subject(), now)
            .await?;
        let requested = self
            .tickets
            .list_children(ticket_id)
            .await?
            .into_iter()
            .map(|child| child.ticket.id)
            .collect();
        let not_cancellable = not_cancellable(requested, &terminated);
        if !not_cancellable.is_empty() {
            warn!(
                parent_ticket_id = %ticket_id,
                not_cancellable = not_cancellable.len(),
                "batch cancelled with children past the decision point"
            );
        }
        info!(
            parent_ticket_id = %ticket_id,
            terminated = terminated.len(),
            "pending batch children cancelled with parent"
        );
        self.resolver.resolve(ticket_id).await?;

        Ok(CancelReport {
            outcome,
            children: TerminationReport {
                terminated,
                not_cancellable,
            },
        })
    }
}
