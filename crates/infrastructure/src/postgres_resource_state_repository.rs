use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tollgate_application::{ResourceStateRecord, ResourceStateRepository};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::{DomainEventId, ResourceIdentity, ResourceState};

/// PostgreSQL-backed last-known resource state.
#[derive(Clone)]
pub struct PostgresResourceStateRepository {
    pool: PgPool,
}

impl PostgresResourceStateRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ResourceStateRow {
    cluster: String,
    namespace: String,
    name: String,
    state: String,
    last_event_id: uuid::Uuid,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl ResourceStateRepository for PostgresResourceStateRepository {
    async fn record_resource_state(&self, record: ResourceStateRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resource_states (
                cluster,
                namespace,
                name,
                state,
                last_event_id,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (cluster, namespace, name)
            DO UPDATE SET
                state = EXCLUDED.state,
                last_event_id = EXCLUDED.last_event_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.identity.cluster())
        .bind(record.identity.namespace())
        .bind(record.identity.name())
        .bind(record.state.as_str())
        .bind(record.last_event_id.as_uuid())
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record state of resource '{}': {error}",
                record.identity
            ))
        })?;

        Ok(())
    }

    async fn find_resource_state(
        &self,
        identity: &ResourceIdentity,
    ) -> AppResult<Option<ResourceStateRecord>> {
        let row = sqlx::query_as::<_, ResourceStateRow>(
            r#"
            SELECT cluster, namespace, name, state, last_event_id, updated_at
            FROM resource_states
            WHERE cluster = $1
              AND namespace = $2
              AND name = $3
            "#,
        )
        .bind(identity.cluster())
        .bind(identity.namespace())
        .bind(identity.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load state of resource '{identity}': {error}"
            ))
        })?;

        row.map(resource_state_from_row).transpose()
    }
}

fn resource_state_from_row(row: ResourceStateRow) -> AppResult<ResourceStateRecord> {
    Ok(ResourceStateRecord {
        identity: ResourceIdentity::new(row.cluster, row.namespace, row.name)?,
        state: ResourceState::parse(row.state.as_str())?,
        last_event_id: DomainEventId::from_uuid(row.last_event_id),
        updated_at: row.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tollgate_application::{ResourceStateRecord, ResourceStateRepository};
    use tollgate_domain::{OperationType, ResourceIdentity, ResourceState};

    use super::PostgresResourceStateRepository;
    use crate::test_support::{seed_ticket, test_pool};

    #[tokio::test]
    async fn latest_state_replaces_the_previous_one() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let repository = PostgresResourceStateRepository::new(pool.clone());
        let first = seed_ticket(&pool, OperationType::Create).await;
        let second = seed_ticket(&pool, OperationType::Power).await;
        let Ok(identity) =
            ResourceIdentity::new("east-1", "default", format!("vm-{}", uuid::Uuid::new_v4()))
        else {
            panic!("identity should be valid");
        };

        for (state, event_id) in [
            (ResourceState::Creating, first.event.id()),
            (ResourceState::Stopped, second.event.id()),
        ] {
            let recorded = repository
                .record_resource_state(ResourceStateRecord {
                    identity: identity.clone(),
                    state,
                    last_event_id: event_id,
                    updated_at: Utc::now(),
                })
                .await;
            assert!(recorded.is_ok());
        }

        let stored = repository.find_resource_state(&identity).await;
        let Ok(Some(stored)) = stored else {
            panic!("state should be stored");
        };
        assert_eq!(stored.state, ResourceState::Stopped);
        assert_eq!(stored.last_event_id, second.event.id());

        let Ok(other) = ResourceIdentity::new("east-1", "default", "never-touched") else {
            panic!("identity should be valid");
        };
        assert!(matches!(repository.find_resource_state(&other).await, Ok(None)));
    }
}
