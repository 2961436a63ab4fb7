//! Execution workers — claim jobs and perform the repository mutation.
//!
//! Each worker polls the durable queue, resolves the full automation
//! context and a live credential at claim time, then drives the
//! version-control client: clone-or-update, append, commit as the
//! owner, push. Failures propagate to the queue's retry mechanism;
//! only the worker's own logging side effect is best-effort.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::automation::{ExecutionLogEntry, ExecutionOutcome, Job};
use crate::error::Result;
use crate::git::VersionControl;
use crate::queue::JobQueue;
use crate::store::{CredentialResolver, Database};

/// Keyed mutexes serialising jobs that share a working copy.
///
/// The upstream design has no per-(owner, repository) mutual
/// exclusion; this closes that correctness gap.
pub struct RepoLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a working-copy key, creating it on first use.
    pub async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(
                map.entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

impl Default for RepoLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn Database>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub git: Arc<dyn VersionControl>,
    pub locks: Arc<RepoLocks>,
    /// Domain for synthesized commit emails (`<username>@<domain>`).
    pub provider_domain: String,
}

/// Outcome of one execution attempt.
enum Execution {
    /// Mutation performed; confirmation message for the log.
    Completed(String),
    /// Automation gone or inactive — nothing to do, nothing to log.
    Skipped,
}

/// A worker loop pulling jobs from the queue.
pub struct ExecutionWorker {
    id: usize,
    queue: Arc<JobQueue>,
    deps: WorkerDeps,
    poll_interval: Duration,
}

impl ExecutionWorker {
    pub fn new(id: usize, queue: Arc<JobQueue>, deps: WorkerDeps, poll_interval: Duration) -> Self {
        Self {
            id,
            queue,
            deps,
            poll_interval,
        }
    }

    /// Run until the task is aborted.
    pub async fn run(self) {
        tracing::info!(worker = self.id, "Execution worker started");
        loop {
            match self.queue.claim().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    tracing::error!(worker = self.id, "Failed to claim job: {e}");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Process one claimed job through to a terminal attempt outcome.
    pub async fn process(&self, job: Job) {
        match self.execute(&job).await {
            Ok(Execution::Completed(message)) => {
                self.append_log(&job, ExecutionOutcome::Success, &message).await;
                if let Err(e) = self.queue.complete(&job).await {
                    tracing::error!(job = %job.id, "Failed to mark job succeeded: {e}");
                }
            }
            Ok(Execution::Skipped) => {
                tracing::debug!(
                    job = %job.id,
                    automation = %job.automation_id,
                    "Automation missing or inactive, job resolved as no-op"
                );
                if let Err(e) = self.queue.complete(&job).await {
                    tracing::error!(job = %job.id, "Failed to mark no-op job succeeded: {e}");
                }
            }
            Err(error) => {
                // Best-effort failure record; must not mask the error
                // that drives the retry decision.
                self.append_log(&job, ExecutionOutcome::Failure, &error.to_string())
                    .await;
                if let Err(e) = self.queue.fail(&job, &error.to_string()).await {
                    tracing::error!(job = %job.id, "Failed to record job failure: {e}");
                }
            }
        }
    }

    /// The mutation sequence. Every step is fatal to the attempt.
    async fn execute(&self, job: &Job) -> Result<Execution> {
        let Some(ctx) = self
            .deps
            .store
            .get_automation_context(job.automation_id)
            .await?
        else {
            return Ok(Execution::Skipped);
        };

        // Live credential, resolved now rather than at enqueue time, so
        // a revoked token fails fast.
        let token = self
            .deps
            .credentials
            .resolve_access_token(ctx.user.id)
            .await?;

        let key = ctx.repository.working_copy_key();
        let _guard = self.deps.locks.acquire(&key).await;

        let local_path = self
            .deps
            .git
            .clone_or_update(
                &ctx.repository.clone_url,
                &key,
                &ctx.repository.default_branch,
                Some(&token),
            )
            .await?;

        self.deps
            .git
            .append(&local_path, &ctx.automation.file_path, &ctx.automation.content)
            .await?;

        let now = Utc::now();
        let commit_message = format!(
            "Updated {} at {}",
            ctx.automation.file_path,
            now.to_rfc3339()
        );
        let author_name = ctx.user.author_name().to_string();
        let author_email = ctx.user.author_email(&self.deps.provider_domain);

        let sha = self
            .deps
            .git
            .commit(
                &local_path,
                &ctx.automation.file_path,
                &commit_message,
                &author_name,
                &author_email,
            )
            .await?;

        self.deps
            .git
            .push(&local_path, &ctx.repository.default_branch)
            .await?;

        tracing::info!(
            worker = self.id,
            job = %job.id,
            automation = %ctx.automation.id,
            commit = %sha,
            author = %author_name,
            "Automation executed"
        );

        Ok(Execution::Completed(format!(
            "Successfully executed at {}",
            now.to_rfc3339()
        )))
    }

    /// Write an execution log entry, best-effort.
    async fn append_log(&self, job: &Job, outcome: ExecutionOutcome, message: &str) {
        let entry = ExecutionLogEntry::new(job.automation_id, job.user_id, outcome, message);
        if let Err(e) = self.deps.store.append_execution_log(&entry).await {
            tracing::warn!(job = %job.id, "Failed to write execution log entry: {e}");
        }
    }
}
