use super::*;

impl ApprovalService {
    /// Records a `*_requested` event and its pending ticket in one transaction.
    pub async fn submit_operation(
        &self,
        actor: &UserIdentity,
        request: SubmitOperationRequest,
    ) -> AppResult<SubmittedTicket> {
        check_operation(
            &request.operation,
            request.environment.as_deref(),
            &request.confirmation,
        )?;

        let now = Utc::now();
        let operation_type = request.operation.operation_type();
        let event = NewDomainEvent::with_json(
            operation_type.requested_event_type(),
            AggregateType::Resource,
            request.operation.identity().key(),
            &request.operation,
            actor.subject(),
        )?
        .into_event(DomainEventId::new(), now);
        let ticket = ApprovalTicket::pending(
            TicketId::new(),
            event.id(),
            operation_type,
            actor.subject(),
            normalize_reason(request.reason),
            None,
            now,
        );
        let submitted = SubmittedTicket { ticket, event };

        self.tickets.insert_ticket_with_event(&submitted).await?;

        info!(
            ticket_id = %submitted.ticket.id,
            event_id = %submitted.event.id(),
            operation = %operation_type,
            requester = actor.subject(),
            "operation submitted for approval"
        );
        self.resolver.notify(&submitted.event).await;

        Ok(submitted)
    }

    /// Records a batch parent with one child per item in one transaction.
    ///
    /// Rejected with `RateLimited` when the requester already holds too many
    /// pending tickets.
    pub async fn submit_batch(
        &self,
        actor: &UserIdentity,
        request: SubmitBatchRequest,
    ) -> AppResult<SubmittedBatch> {
        let batch_operation = request.operation.batch();
        let child_operation = batch_operation.child();

        if request.items.is_empty() {
            return Err(AppError::Validation(
                "a batch needs at least one item".to_owned(),
            ));
        }

        if request.items.len() > self.admission.max_batch_size {
            return Err(AppError::Validation(format!(
                "batch of {} items exceeds the limit of {}",
                request.items.len(),
                self.admission.max_batch_size
            )));
        }

        let mut identities = HashSet::with_capacity(request.items.len());
        for item in &request.items {
            if item.operation.operation_type() != child_operation {
                return Err(AppError::Validation(format!(
                    "{batch_operation} batch cannot contain a {} item",
                    item.operation.operation_type()
                )));
            }

            check_operation(
                &item.operation,
                request.environment.as_deref(),
                &item.confirmation,
            )?;

            if !identities.insert(item.operation.identity().key()) {
                return Err(AppError::Validation(format!(
                    "resource '{}' appears more than once in the batch",
                    item.operation.identity()
                )));
            }
        }

        let pending = self
            .tickets
            .count_pending_tickets_for_requester(actor.subject())
            .await?;
        let requested = u64::try_from(request.items.len()).unwrap_or(u64::MAX);
        if pending.saturating_add(requested) > self.admission.max_pending_per_requester {
            warn!(
                requester = actor.subject(),
                pending,
                requested,
                limit = self.admission.max_pending_per_requester,
                "batch rejected by admission control"
            );
            return Err(AppError::RateLimited {
                message: format!(
                    "too many pending requests: {pending} pending, {requested} requested, limit {}",
                    self.admission.max_pending_per_requester
                ),
                retry_after_seconds: self.admission.retry_after_seconds,
            });
        }

        let now = Utc::now();
        let reason = normalize_reason(request.reason);
        let parent_ticket_id = TicketId::new();
        let parent_event = NewDomainEvent::with_json(
            batch_operation.requested_event_type(),
            AggregateType::Batch,
            parent_ticket_id.to_string(),
            &BatchPayload {
                operation: batch_operation,
                child_count: u32::try_from(request.items.len()).unwrap_or(u32::MAX),
            },
            actor.subject(),
        )?
        .into_event(DomainEventId::new(), now);
        let parent = SubmittedTicket {
            ticket: ApprovalTicket::pending(
                parent_ticket_id,
                parent_event.id(),
                batch_operation,
                actor.subject(),
                reason.clone(),
                None,
                now,
            ),
            event: parent_event,
        };

        let mut children = Vec::with_capacity(request.items.len());
        for item in request.items {
            let event = NewDomainEvent::with_json(
                child_operation.requested_event_type(),
                AggregateType::Resource,
                item.operation.identity().key(),
                &item.operation,
                actor.subject(),
            )?
            .into_event(DomainEventId::new(), now);
            children.push(SubmittedTicket {
                ticket: ApprovalTicket::pending(
                    TicketId::new(),
                    event.id(),
                    child_operation,
                    actor.subject(),
                    reason.clone(),
                    Some(parent_ticket_id),
                    now,
                ),
                event,
            });
        }

        let batch = SubmittedBatch { parent, children };
        self.tickets.insert_batch(&batch).await?;

        info!(
            parent_ticket_id = %parent_ticket_id,
            operation = %batch_operation,
            children = batch.children.len(),
            requester = actor.subject(),
            "batch submitted for approval"
        );
        self.resolver.notify(&batch.parent.event).await;

        Ok(batch)
    }
}

/// Validates an operation and applies the delete confirmation policy.
fn check_operation(
    operation: &ResourceOperation,
    environment: Option<&str>,
    confirmation: &DeleteConfirmation,
) -> AppResult<()> {
    operation.validate()?;

    if let ResourceOperation::Delete { identity } = operation {
        validate_delete_confirmation(environment.unwrap_or_default(), identity.name(), confirmation)?;
    }

    Ok(())
}
