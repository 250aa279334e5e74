//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_infrastructure_client;
mod in_memory_access_token_replay_store;
mod logging_domain_event_handler;
mod postgres_access_token_replay_store;
mod postgres_approval_ticket_repository;
mod postgres_domain_event_repository;
mod postgres_execution_queue;
mod postgres_resource_state_repository;
mod redis_access_token_replay_store;

#[cfg(test)]
mod test_support;

pub use http_infrastructure_client::HttpInfrastructureClient;
pub use in_memory_access_token_replay_store::InMemoryAccessTokenReplayStore;
pub use logging_domain_event_handler::LoggingDomainEventHandler;
pub use postgres_access_token_replay_store::PostgresAccessTokenReplayStore;
pub use postgres_approval_ticket_repository::PostgresApprovalTicketRepository;
pub use postgres_domain_event_repository::PostgresDomainEventRepository;
pub use postgres_execution_queue::PostgresExecutionQueue;
pub use postgres_resource_state_repository::PostgresResourceStateRepository;
pub use redis_access_token_replay_store::RedisAccessTokenReplayStore;

/// Migrations applied by the worker at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
