//! Tollgate execution worker runtime.

#![forbid(unsafe_code)]

mod config;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tollgate_application::{
    DomainEventHandler, EventDispatcher, ExecutionRetryPolicy, ExecutionService,
};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::DomainEventType;
use tollgate_infrastructure::{
    HttpInfrastructureClient, LoggingDomainEventHandler, MIGRATOR, PostgresAccessTokenReplayStore,
    PostgresApprovalTicketRepository, PostgresDomainEventRepository, PostgresExecutionQueue,
    PostgresResourceStateRepository,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::WorkerConfig;

const ORPHAN_RECOVERY_BATCH: usize = 100;
const INFRA_API_TIMEOUT_SECONDS: u64 = 30;

async fn purge_consumed_tokens(replay_store: &PostgresAccessTokenReplayStore) {
    match replay_store.purge_expired(Utc::now()).await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "purged expired access token ids"),
        Err(error) => warn!(error = %error, "failed to purge expired access token ids"),
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(&config).await?;
    MIGRATOR
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    let replay_store = PostgresAccessTokenReplayStore::new(pool.clone());
    let service = Arc::new(build_execution_service(&config, pool)?);

    info!(
        worker_id = %config.worker_id,
        pool_size = config.pool_size,
        claim_limit = config.claim_limit,
        lease_seconds = config.lease_seconds,
        poll_interval_ms = config.poll_interval_ms,
        "tollgate worker started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = (1..=config.pool_size)
        .map(|index| {
            tokio::spawn(run_worker_loop(
                Arc::clone(&service),
                config.clone(),
                format!("{}-{index}", config.worker_id),
                shutdown_rx.clone(),
            ))
        })
        .collect();
    handles.push(tokio::spawn(run_recovery_loop(
        Arc::clone(&service),
        replay_store,
        config.clone(),
        shutdown_rx,
    )));

    tokio::signal::ctrl_c()
        .await
        .map_err(|error| AppError::Internal(format!("failed to listen for ctrl-c: {error}")))?;
    info!("shutdown requested, draining workers");
    signal_shutdown(&shutdown_tx);

    for handle in handles {
        if let Err(error) = handle.await {
            warn!(error = %error, "worker task ended abnormally");
        }
    }

    info!("tollgate worker stopped");
    Ok(())
}

/// Tells every loop to stop; returns false when none was listening.
fn signal_shutdown(shutdown_tx: &watch::Sender<bool>) -> bool {
    match shutdown_tx.send(true) {
        Ok(()) => true,
        Err(error) => {
            warn!(error = %error, "no worker task was listening for shutdown");
            false
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn connect_pool(config: &WorkerConfig) -> AppResult<PgPool> {
    let max_connections = u32::try_from(config.pool_size.saturating_add(2)).unwrap_or(u32::MAX);
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(config.database_url.as_str())
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to postgres: {error}")))
}

fn build_execution_service(config: &WorkerConfig, pool: PgPool) -> AppResult<ExecutionService> {
    let dispatcher = Arc::new(EventDispatcher::new());
    let event_log: Arc<dyn DomainEventHandler> = Arc::new(LoggingDomainEventHandler::new());
    for event_type in DomainEventType::ALL {
        dispatcher.register(event_type, Arc::clone(&event_log))?;
    }

    let http_client = reqwest::Client::builder()
        .timeout(StdDuration::from_secs(INFRA_API_TIMEOUT_SECONDS))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build http client: {error}")))?;
    let client = HttpInfrastructureClient::new(
        http_client,
        config.infra_api_base_url.as_str(),
        config.infra_api_token.clone(),
    )?;
    let retry_policy =
        ExecutionRetryPolicy::new(config.max_attempts, config.retry_backoff_seconds)?;

    Ok(ExecutionService::new(
        Arc::new(PostgresApprovalTicketRepository::new(pool.clone())),
        Arc::new(PostgresDomainEventRepository::new(pool.clone())),
        Arc::new(PostgresExecutionQueue::new(pool.clone())),
        Arc::new(client),
        Arc::new(PostgresResourceStateRepository::new(pool)),
        dispatcher,
        retry_policy,
    ))
}

async fn run_worker_loop(
    service: Arc<ExecutionService>,
    config: WorkerConfig,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_interval = StdDuration::from_millis(config.poll_interval_ms);

    while !*shutdown.borrow() {
        let jobs = match service
            .claim_jobs_for_worker(&worker_id, config.claim_limit, config.lease_seconds)
            .await
        {
            Ok(jobs) => jobs,
            Err(error) => {
                warn!(worker_id = %worker_id, error = %error, "failed to claim execution jobs");
                Vec::new()
            }
        };

        if jobs.is_empty() {
            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        info!(worker_id = %worker_id, claimed = jobs.len(), "claimed execution jobs");
        for job in jobs {
            match service.execute_claimed_job(&job).await {
                Ok(outcome) => info!(
                    worker_id = %worker_id,
                    job_id = %job.job_id,
                    event_id = %job.event_id,
                    attempt = job.attempt,
                    outcome = outcome.as_str(),
                    "execution job finished"
                ),
                Err(error) => warn!(
                    worker_id = %worker_id,
                    job_id = %job.job_id,
                    event_id = %job.event_id,
                    attempt = job.attempt,
                    error = %error,
                    "execution job errored; lease will expire"
                ),
            }
        }
    }

    info!(worker_id = %worker_id, "worker loop stopped");
}

async fn run_recovery_loop(
    service: Arc<ExecutionService>,
    replay_store: PostgresAccessTokenReplayStore,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let grace = chrono::Duration::seconds(
        i64::try_from(config.recovery_grace_seconds).unwrap_or(i64::MAX),
    );
    let mut interval =
        tokio::time::interval(StdDuration::from_secs(config.recovery_interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        match service
            .recover_orphaned_approvals(grace, ORPHAN_RECOVERY_BATCH)
            .await
        {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "re-enqueued orphaned approvals"),
            Err(error) => warn!(error = %error, "orphaned approval sweep failed"),
        }
        purge_consumed_tokens(&replay_store).await;
    }

    info!("recovery loop stopped");
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::signal_shutdown;

    #[test]
    fn shutdown_reaches_listening_loops() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        assert!(signal_shutdown(&shutdown_tx));
        assert!(*shutdown_rx.borrow());
    }

    #[test]
    fn shutdown_without_listeners_is_reported() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_rx);

        assert!(!signal_shutdown(&shutdown_tx));
    }
}
