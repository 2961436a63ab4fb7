use std::sync::Arc;

use autocommit::config::ServiceConfig;
use autocommit::git::GitCli;
use autocommit::queue::{JobQueue, RetryPolicy};
use autocommit::registry::ScheduleRegistry;
use autocommit::scheduler;
use autocommit::store::{Database, LibSqlBackend, StoreCredentialResolver};
use autocommit::worker::{ExecutionWorker, RepoLocks, WorkerDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env();

    eprintln!("autocommit v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Repos: {}", config.repo_storage_path.display());
    eprintln!(
        "   Scheduler: tick every {}s, {} workers, {} attempts per job\n",
        config.tick_interval.as_secs(),
        config.worker_count,
        config.max_attempts,
    );

    // ── Store ────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);

    // ── Schedule registry ────────────────────────────────────────────
    let registry = Arc::new(ScheduleRegistry::new());
    let loaded = registry.reload(db.as_ref()).await?;
    tracing::info!(automations = loaded, "Active automations registered");

    // ── Queue + workers ──────────────────────────────────────────────
    let queue = Arc::new(JobQueue::new(
        Arc::clone(&db),
        RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base_delay,
        },
    ));

    let deps = WorkerDeps {
        store: Arc::clone(&db),
        credentials: Arc::new(StoreCredentialResolver::new(Arc::clone(&db))),
        git: Arc::new(
            GitCli::new(config.repo_storage_path.clone()).with_timeout(config.git_timeout),
        ),
        locks: Arc::new(RepoLocks::new()),
        provider_domain: config.provider_domain.clone(),
    };

    let worker_handles: Vec<_> = (0..config.worker_count)
        .map(|id| {
            let worker = ExecutionWorker::new(
                id,
                Arc::clone(&queue),
                deps.clone(),
                config.queue_poll_interval,
            );
            tokio::spawn(worker.run())
        })
        .collect();

    // ── Time-match loop ──────────────────────────────────────────────
    let tick_handle = scheduler::spawn_tick_loop(
        Arc::clone(&registry),
        Arc::clone(&queue),
        config.tick_interval,
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    tick_handle.abort();
    for handle in &worker_handles {
        handle.abort();
    }
    let _ = futures::future::join_all(worker_handles).await;

    Ok(())
}
