use std::sync::Arc;

use chrono::Utc;
use tollgate_application::{
    ApprovalTicketRepository, ApproveTicketInput, BatchDecision, DomainEventRepository,
    RejectTicketInput, SubmittedBatch, SubmittedTicket,
};
use tollgate_domain::{
    AggregateType, ApprovalTicket, DecisionOutcome, DecisionOverrides, DomainEventId,
    DomainEventStatus, NewDomainEvent, OperationType, TicketId, TicketStatus,
};

use super::PostgresApprovalTicketRepository;
use crate::PostgresDomainEventRepository;
use crate::test_support::test_pool;

fn submitted(operation_type: OperationType, parent: Option<TicketId>) -> SubmittedTicket {
    let aggregate_type = if operation_type.is_batch() {
        AggregateType::Batch
    } else {
        AggregateType::Resource
    };
    let event = match NewDomainEvent::new(
        operation_type.requested_event_type(),
        aggregate_type,
        format!("east-1/default/{}", uuid::Uuid::new_v4()),
        br#"{"test":true}"#.to_vec(),
        "alice",
    ) {
        Ok(event) => event.into_event(DomainEventId::new(), Utc::now()),
        Err(error) => panic!("event should build: {error}"),
    };
    let ticket = ApprovalTicket::pending(
        TicketId::new(),
        event.id(),
        operation_type,
        "alice",
        Some("maintenance".to_owned()),
        parent,
        Utc::now(),
    );

    SubmittedTicket { ticket, event }
}

fn batch(children: usize) -> SubmittedBatch {
    let parent = submitted(OperationType::BatchPower, None);
    let children = (0..children)
        .map(|_| submitted(OperationType::Power, Some(parent.ticket.id)))
        .collect();
    SubmittedBatch { parent, children }
}

#[tokio::test]
async fn concurrent_approvals_have_exactly_one_winner() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = Arc::new(PostgresApprovalTicketRepository::new(pool));
    let submitted = submitted(OperationType::Create, None);
    assert!(repository.insert_ticket_with_event(&submitted).await.is_ok());

    let mut handles = Vec::new();
    for index in 0..8 {
        let repository = Arc::clone(&repository);
        let input = ApproveTicketInput {
            ticket_id: submitted.ticket.id,
            event_id: submitted.event.id(),
            approver: format!("approver-{index}"),
            overrides: DecisionOverrides::default(),
            decided_at: Utc::now(),
        };
        handles.push(tokio::spawn(async move {
            let approver = input.approver.clone();
            (approver, repository.approve_ticket(input).await)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((approver, Ok(DecisionOutcome::Applied))) => winners.push(approver),
            Ok((_, Ok(DecisionOutcome::AlreadyDecided))) => {}
            Ok((_, Err(error))) => panic!("approval should not error: {error}"),
            Err(error) => panic!("approval task panicked: {error}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let stored = repository.find_ticket(submitted.ticket.id).await;
    let Ok(Some(stored)) = stored else {
        panic!("ticket should be stored");
    };
    assert_eq!(stored.status, TicketStatus::Approved);
    assert_eq!(stored.approver.as_deref(), Some(winners[0].as_str()));
    assert!(stored.decided_at.is_some());
}

#[tokio::test]
async fn approve_and_reject_race_settles_ticket_and_event_together() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = Arc::new(PostgresApprovalTicketRepository::new(pool.clone()));
    let events = PostgresDomainEventRepository::new(pool);
    let submitted = submitted(OperationType::Create, None);
    assert!(repository.insert_ticket_with_event(&submitted).await.is_ok());

    let mut handles = Vec::new();
    for index in 0..8 {
        let repository = Arc::clone(&repository);
        let ticket_id = submitted.ticket.id;
        let event_id = submitted.event.id();
        handles.push(tokio::spawn(async move {
            let actor = format!("reviewer-{index}");
            let approves = index % 2 == 0;
            let outcome = if approves {
                repository
                    .approve_ticket(ApproveTicketInput {
                        ticket_id,
                        event_id,
                        approver: actor.clone(),
                        overrides: DecisionOverrides::default(),
                        decided_at: Utc::now(),
                    })
                    .await
            } else {
                repository
                    .reject_ticket(RejectTicketInput {
                        ticket_id,
                        event_id,
                        approver: actor.clone(),
                        reason: "not this week".to_owned(),
                        decided_at: Utc::now(),
                    })
                    .await
            };
            (actor, approves, outcome)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((actor, approves, Ok(DecisionOutcome::Applied))) => winners.push((actor, approves)),
            Ok((_, _, Ok(DecisionOutcome::AlreadyDecided))) => {}
            Ok((_, _, Err(error))) => panic!("decision should not error: {error}"),
            Err(error) => panic!("decision task panicked: {error}"),
        }
    }
    assert_eq!(winners.len(), 1);
    let (winner, approved) = &winners[0];

    let Ok(Some(stored)) = repository.find_ticket(submitted.ticket.id).await else {
        panic!("ticket should be stored");
    };
    let Ok(Some(event)) = events.find_event(submitted.event.id()).await else {
        panic!("event should be stored");
    };
    assert_eq!(stored.approver.as_deref(), Some(winner.as_str()));
    if *approved {
        assert_eq!(stored.status, TicketStatus::Approved);
        assert_eq!(event.status(), DomainEventStatus::Pending);
    } else {
        assert_eq!(stored.status, TicketStatus::Rejected);
        assert_eq!(stored.reject_reason.as_deref(), Some("not this week"));
        assert_eq!(event.status(), DomainEventStatus::Cancelled);
    }
}

#[tokio::test]
async fn approval_requires_the_bound_event() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = PostgresApprovalTicketRepository::new(pool);
    let submitted = submitted(OperationType::Delete, None);
    assert!(repository.insert_ticket_with_event(&submitted).await.is_ok());

    let outcome = repository
        .approve_ticket(ApproveTicketInput {
            ticket_id: submitted.ticket.id,
            event_id: DomainEventId::new(),
            approver: "bob".to_owned(),
            overrides: DecisionOverrides::default(),
            decided_at: Utc::now(),
        })
        .await;

    assert!(matches!(outcome, Ok(DecisionOutcome::AlreadyDecided)));
}

#[tokio::test]
async fn rejection_cancels_the_request_event() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = PostgresApprovalTicketRepository::new(pool.clone());
    let events = PostgresDomainEventRepository::new(pool);
    let submitted = submitted(OperationType::Delete, None);
    assert!(repository.insert_ticket_with_event(&submitted).await.is_ok());

    let outcome = repository
        .reject_ticket(RejectTicketInput {
            ticket_id: submitted.ticket.id,
            event_id: submitted.event.id(),
            approver: "bob".to_owned(),
            reason: "wrong namespace".to_owned(),
            decided_at: Utc::now(),
        })
        .await;
    assert!(matches!(outcome, Ok(DecisionOutcome::Applied)));

    let event = events.find_event(submitted.event.id()).await;
    let Ok(Some(event)) = event else {
        panic!("event should exist");
    };
    assert_eq!(event.status(), DomainEventStatus::Cancelled);

    let cancel = repository
        .cancel_ticket(submitted.ticket.id, "alice", Utc::now())
        .await;
    assert!(matches!(cancel, Ok(DecisionOutcome::AlreadyDecided)));
}

#[tokio::test]
async fn a_duplicate_event_binding_is_a_conflict() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = PostgresApprovalTicketRepository::new(pool);
    let first = submitted(OperationType::Create, None);
    assert!(repository.insert_ticket_with_event(&first).await.is_ok());

    let mut second = submitted(OperationType::Create, None);
    second.ticket.event_id = first.event.id();
    second.event = first.event.clone();

    let result = repository.insert_ticket_with_event(&second).await;
    assert!(result.is_err());
    assert!(matches!(repository.find_ticket(second.ticket.id).await, Ok(None)));
}

#[tokio::test]
async fn batch_decision_touches_only_pending_children() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = PostgresApprovalTicketRepository::new(pool);
    let batch = batch(3);
    assert!(repository.insert_batch(&batch).await.is_ok());

    let cancelled = repository
        .cancel_ticket(batch.children[1].ticket.id, "alice", Utc::now())
        .await;
    assert!(matches!(cancelled, Ok(DecisionOutcome::Applied)));

    let decision = repository
        .decide_batch(
            batch.parent.ticket.id,
            "bob",
            BatchDecision::Approve {
                overrides: DecisionOverrides {
                    selected_cluster: Some("west-2".to_owned()),
                    selected_spec: None,
                },
            },
            Utc::now(),
        )
        .await;
    let Ok(decision) = decision else {
        panic!("batch decision should succeed");
    };
    assert_eq!(decision.parent, DecisionOutcome::Applied);
    let decided: Vec<TicketId> = decision.children.iter().map(|child| child.ticket_id).collect();
    assert_eq!(
        decided,
        vec![batch.children[0].ticket.id, batch.children[2].ticket.id]
    );

    let again = repository
        .decide_batch(
            batch.parent.ticket.id,
            "carol",
            BatchDecision::Reject {
                reason: "too late".to_owned(),
            },
            Utc::now(),
        )
        .await;
    assert!(matches!(
        again,
        Ok(ref result) if result.parent == DecisionOutcome::AlreadyDecided && result.children.is_empty()
    ));

    let children = repository.list_children(batch.parent.ticket.id).await;
    let Ok(children) = children else {
        panic!("children should list");
    };
    let states: Vec<(TicketStatus, DomainEventStatus)> = children
        .iter()
        .map(|child| (child.ticket.status, child.event_status))
        .collect();
    assert_eq!(
        states,
        vec![
            (TicketStatus::Approved, DomainEventStatus::Pending),
            (TicketStatus::Cancelled, DomainEventStatus::Cancelled),
            (TicketStatus::Approved, DomainEventStatus::Pending),
        ]
    );
    assert_eq!(
        children[0].ticket.overrides.selected_cluster.as_deref(),
        Some("west-2")
    );
}

#[tokio::test]
async fn termination_respects_the_selection() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = PostgresApprovalTicketRepository::new(pool);
    let batch = batch(3);
    assert!(repository.insert_batch(&batch).await.is_ok());

    let selection = [batch.children[0].ticket.id, batch.children[2].ticket.id];
    let terminated = repository
        .terminate_pending_children(batch.parent.ticket.id, Some(&selection), "alice", Utc::now())
        .await;
    let Ok(terminated) = terminated else {
        panic!("termination should succeed");
    };
    let ids: Vec<TicketId> = terminated.iter().map(|child| child.ticket_id).collect();
    assert_eq!(ids, selection.to_vec());

    let pending = repository.count_pending_tickets_for_requester("alice").await;
    let Ok(pending) = pending else {
        panic!("pending count should load");
    };
    assert!(pending >= 1);

    let remaining = repository
        .terminate_pending_children(batch.parent.ticket.id, None, "alice", Utc::now())
        .await;
    assert!(matches!(remaining, Ok(ref rows) if rows.len() == 1));
}

#[tokio::test]
async fn failed_children_are_reset_with_their_parent_event() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let repository = PostgresApprovalTicketRepository::new(pool.clone());
    let events = PostgresDomainEventRepository::new(pool);
    let batch = batch(2);
    assert!(repository.insert_batch(&batch).await.is_ok());

    let decision = repository
        .decide_batch(
            batch.parent.ticket.id,
            "bob",
            BatchDecision::Approve {
                overrides: DecisionOverrides::default(),
            },
            Utc::now(),
        )
        .await;
    assert!(decision.is_ok());

    for event_id in [batch.children[0].event.id(), batch.parent.event.id()] {
        let failed = events.set_event_status(event_id, DomainEventStatus::Failed).await;
        assert!(matches!(failed, Ok(transition) if transition.is_applied()));
    }
    let completed = events
        .set_event_status(batch.children[1].event.id(), DomainEventStatus::Completed)
        .await;
    assert!(completed.is_ok());

    let reset = repository
        .reset_failed_children(batch.parent.ticket.id, None)
        .await;
    let Ok(reset) = reset else {
        panic!("reset should succeed");
    };
    assert_eq!(reset.len(), 1);
    assert_eq!(reset[0].ticket_id, batch.children[0].ticket.id);

    let parent_event = events.find_event(batch.parent.event.id()).await;
    assert!(matches!(
        parent_event,
        Ok(Some(ref event)) if event.status() == DomainEventStatus::Pending
    ));

    let orphaned = repository
        .list_orphaned_approvals(Utc::now() + chrono::Duration::seconds(1), 100)
        .await;
    let Ok(orphaned) = orphaned else {
        panic!("orphaned approvals should list");
    };
    assert!(orphaned.iter().any(|row| row.ticket_id == batch.children[0].ticket.id));
    assert!(!orphaned.iter().any(|row| row.ticket_id == batch.parent.ticket.id));
}
