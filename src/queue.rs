//! Durable job queue over the persistent store.
//!
//! Decouples time-match triggering from execution. Jobs survive a
//! process crash; delivery is one-worker-at-a-time per job but
//! at-least-once across retries, so the downstream mutation must
//! tolerate re-application.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::automation::{dedup_key, Job, JobStatus};
use crate::error::Result;
use crate::store::Database;

/// Retry policy: bounded attempts with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts have
    /// already run: 2s after the first failure, 4s after the second.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_delay * 2u32.pow(exponent)
    }
}

/// Handle to the durable queue.
pub struct JobQueue {
    store: Arc<dyn Database>,
    policy: RetryPolicy,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Database>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Enqueue an execution request for one fired trigger.
    ///
    /// Best-effort dedup: returns `Ok(None)` without inserting when a
    /// queued or running job with the same dedup key already exists.
    pub async fn enqueue(
        &self,
        automation_id: Uuid,
        user_id: Uuid,
        trigger_index: usize,
    ) -> Result<Option<Uuid>> {
        let key = dedup_key(automation_id, trigger_index);

        if let Some(existing) = self.store.find_active_job(&key).await? {
            tracing::debug!(
                automation = %automation_id,
                job = %existing.id,
                "Skipping enqueue: job with same dedup key already active"
            );
            return Ok(None);
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            automation_id,
            user_id,
            dedup_key: key,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: self.policy.max_attempts,
            last_error: None,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_job(&job).await?;
        Ok(Some(job.id))
    }

    /// Claim the next due job, if any. The claim is atomic: a job is
    /// delivered to exactly one worker at a time.
    pub async fn claim(&self) -> Result<Option<Job>> {
        Ok(self.store.claim_next_job(Utc::now()).await?)
    }

    /// Mark a claimed job terminally succeeded.
    pub async fn complete(&self, job: &Job) -> Result<()> {
        self.store.complete_job(job.id).await?;
        Ok(())
    }

    /// Record a failed attempt: requeue with backoff while attempts
    /// remain, otherwise mark terminally failed.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        if job.attempts < job.max_attempts {
            let delay = self.policy.delay_after(job.attempts);
            let next = Utc::now()
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(delay.as_secs() as i64));
            tracing::warn!(
                job = %job.id,
                attempt = job.attempts,
                retry_in_secs = delay.as_secs(),
                "Attempt failed, scheduling retry: {error}"
            );
            self.store.retry_job(job.id, error, next).await?;
        } else {
            tracing::error!(
                job = %job.id,
                attempts = job.attempts,
                "Job terminally failed: {error}"
            );
            self.store.fail_job(job.id, error).await?;
        }
        Ok(())
    }
}
