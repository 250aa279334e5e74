use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tollgate_application::DomainEventRepository;
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{
    AggregateType, DomainEvent, DomainEventId, DomainEventParts, DomainEventStatus,
    DomainEventType, NewDomainEvent, StatusTransition,
};

/// PostgreSQL-backed domain event store.
#[derive(Clone)]
pub struct PostgresDomainEventRepository {
    pool: PgPool,
}

impl PostgresDomainEventRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct DomainEventRow {
    id: uuid::Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: String,
    payload: Vec<u8>,
    status: String,
    created_by: String,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl DomainEventRepository for PostgresDomainEventRepository {
    async fn record_event(&self, event: NewDomainEvent) -> AppResult<DomainEvent> {
        let event_id = DomainEventId::new();
        let created_at = sqlx::query_scalar::<_, DateTime<Utc>>(
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
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, now())
            RETURNING created_at
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(event.event_type().as_str())
        .bind(event.aggregate_type().as_str())
        .bind(event.aggregate_id())
        .bind(event.payload())
        .bind(event.created_by())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record '{}' event for aggregate '{}': {error}",
                event.event_type(),
                event.aggregate_id()
            ))
        })?;

        Ok(event.into_event(event_id, created_at))
    }

    async fn find_event(&self, event_id: DomainEventId) -> AppResult<Option<DomainEvent>> {
        let row = sqlx::query_as::<_, DomainEventRow>(
            r#"
            SELECT
                id,
                event_type,
                aggregate_type,
                aggregate_id,
                payload,
                status,
                created_by,
                created_at,
                archived_at
            FROM domain_events
            WHERE id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load domain event '{event_id}': {error}"))
        })?;

        row.map(domain_event_from_row).transpose()
    }

    async fn list_events_for_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> AppResult<Vec<DomainEvent>> {
        let rows = sqlx::query_as::<_, DomainEventRow>(
            r#"
            SELECT
                id,
                event_type,
                aggregate_type,
                aggregate_id,
                payload,
                status,
                created_by,
                created_at,
                archived_at
            FROM domain_events
            WHERE aggregate_type = $1
              AND aggregate_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(aggregate_type.as_str())
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list events for {} '{aggregate_id}': {error}",
                aggregate_type.as_str()
            ))
        })?;

        rows.into_iter().map(domain_event_from_row).collect()
    }

    async fn set_event_status(
        &self,
        event_id: DomainEventId,
        status: DomainEventStatus,
    ) -> AppResult<StatusTransition> {
        let result = sqlx::query(
            r#"
            UPDATE domain_events
            SET status = $2
            WHERE id = $1
              AND status = ANY($3)
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(status.as_str())
        .bind(predecessor_values(status))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to move domain event '{event_id}' to '{status}': {error}"
            ))
        })?;

        Ok(StatusTransition::from_rows_affected(result.rows_affected()))
    }

    async fn archive_event(
        &self,
        event_id: DomainEventId,
        archived_at: DateTime<Utc>,
    ) -> AppResult<StatusTransition> {
        let result = sqlx::query(
            r#"
            UPDATE domain_events
            SET archived_at = $2
            WHERE id = $1
              AND archived_at IS NULL
              AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(archived_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to archive domain event '{event_id}': {error}"
            ))
        })?;

        Ok(StatusTransition::from_rows_affected(result.rows_affected()))
    }
}

/// Storage values of the statuses allowed to move into `target`.
pub(crate) fn predecessor_values(target: DomainEventStatus) -> Vec<String> {
    DomainEventStatus::legal_predecessors(target)
        .iter()
        .map(|status| status.as_str().to_owned())
        .collect()
}

pub(crate) fn domain_event_from_row(row: DomainEventRow) -> AppResult<DomainEvent> {
    Ok(DomainEvent::restore(DomainEventParts {
        id: DomainEventId::from_uuid(row.id),
        event_type: DomainEventType::parse(row.event_type.as_str())?,
        aggregate_type: AggregateType::parse(row.aggregate_type.as_str())?,
        aggregate_id: row.aggregate_id,
        payload: row.payload,
        status: DomainEventStatus::parse(row.status.as_str())?,
        created_by: row.created_by,
        created_at: row.created_at,
        archived_at: row.archived_at,
    }))
}
