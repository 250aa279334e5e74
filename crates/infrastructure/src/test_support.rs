use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tollgate_application::{ApprovalTicketRepository, SubmittedTicket};
use tollgate_domain::{
    AggregateType, ApprovalTicket, DomainEventId, NewDomainEvent, OperationType, TicketId,
};

use crate::{MIGRATOR, PostgresApprovalTicketRepository};

/// Connects to `DATABASE_URL` and migrates it, or returns `None` when unset.
pub(crate) async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres adapter tests: {error}");
    }

    Some(pool)
}

/// Inserts one pending single-resource ticket with its request event.
pub(crate) async fn seed_ticket(pool: &PgPool, operation_type: OperationType) -> SubmittedTicket {
    let event = match NewDomainEvent::new(
        operation_type.requested_event_type(),
        AggregateType::Resource,
        format!("east-1/default/{}", uuid::Uuid::new_v4()),
        br#"{"seeded":true}"#.to_vec(),
        "alice",
    ) {
        Ok(event) => event.into_event(DomainEventId::new(), Utc::now()),
        Err(error) => panic!("seed event should build: {error}"),
    };
    let submitted = SubmittedTicket {
        ticket: ApprovalTicket::pending(
            TicketId::new(),
            event.id(),
            operation_type,
            "alice",
            None,
            None,
            Utc::now(),
        ),
        event,
    };

    let repository = PostgresApprovalTicketRepository::new(pool.clone());
    if let Err(error) = repository.insert_ticket_with_event(&submitted).await {
        panic!("seed ticket should insert: {error}");
    }

    submitted
}
