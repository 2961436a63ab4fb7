//! Time-match loop.
//!
//! One periodic tick compares wall-clock time against every registered
//! trigger and enqueues a job for each match. Minute-granularity
//! evaluation with a tick interval <= 60s means a trigger fires at most
//! once per matching minute; a tick missed to process downtime is a
//! missed run, not caught up later.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};

use crate::queue::JobQueue;
use crate::registry::ScheduleRegistry;

/// Wall-clock components read once per tick, so every comparison in a
/// tick shares one reference frame. Weekday numbering is 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub minute: u32,
    pub hour: u32,
    pub weekday: u32,
}

impl WallClock {
    /// Snapshot the process-local clock.
    pub fn now_local() -> Self {
        let now = Local::now();
        Self {
            minute: now.minute(),
            hour: now.hour(),
            weekday: now.weekday().num_days_from_sunday(),
        }
    }
}

/// Run one tick: enqueue a job for every trigger matching `clock`.
/// Returns the number of jobs enqueued. Enqueue failures are logged
/// and do not abort the tick.
pub async fn run_tick(registry: &ScheduleRegistry, queue: &JobQueue, clock: WallClock) -> usize {
    let mut enqueued = 0;

    for entry in registry.snapshot().await {
        for (index, spec) in entry.triggers.iter().enumerate() {
            if !spec.matches(clock.minute, clock.hour, clock.weekday) {
                continue;
            }

            match queue
                .enqueue(entry.automation_id, entry.user_id, index)
                .await
            {
                Ok(Some(job_id)) => {
                    tracing::info!(
                        automation = %entry.automation_id,
                        trigger_index = index,
                        job = %job_id,
                        "Trigger matched, job enqueued"
                    );
                    enqueued += 1;
                }
                Ok(None) => {
                    tracing::debug!(
                        automation = %entry.automation_id,
                        trigger_index = index,
                        "Trigger matched but an identical job is already active"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        automation = %entry.automation_id,
                        trigger_index = index,
                        "Failed to enqueue job: {e}"
                    );
                }
            }
        }
    }

    enqueued
}

/// Spawn the tick loop background task. Ticks never overlap; the
/// immediate first tick is skipped.
pub fn spawn_tick_loop(
    registry: Arc<ScheduleRegistry>,
    queue: Arc<JobQueue>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let clock = WallClock::now_local();
            tracing::debug!(
                minute = clock.minute,
                hour = clock.hour,
                weekday = clock.weekday,
                "Scheduler tick"
            );
            run_tick(&registry, &queue, clock).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::Automation;
    use crate::queue::RetryPolicy;
    use crate::store::{Database, LibSqlBackend};
    use chrono::Utc;
    use uuid::Uuid;

    async fn fixtures() -> (Arc<ScheduleRegistry>, Arc<JobQueue>, Arc<dyn Database>) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = Arc::new(JobQueue::new(Arc::clone(&store), RetryPolicy::default()));
        let registry = Arc::new(ScheduleRegistry::new());
        (registry, queue, store)
    }

    fn automation_with_schedule(schedule: &str) -> Automation {
        Automation {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            file_path: "log.md".to_string(),
            content: "- entry".to_string(),
            schedule: schedule.to_string(),
            description: String::new(),
            active: true,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn matching_minute_enqueues_exactly_one_job() {
        let (registry, queue, _store) = fixtures().await;
        let automation = automation_with_schedule("0 9 * * 1");
        registry.register(&automation).await;

        // Monday 09:00 — exactly one job.
        let monday_nine = WallClock {
            minute: 0,
            hour: 9,
            weekday: 1,
        };
        assert_eq!(run_tick(&registry, &queue, monday_nine).await, 1);

        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.automation_id, automation.id);
        assert_eq!(job.user_id, automation.user_id);
    }

    #[tokio::test]
    async fn non_matching_times_enqueue_nothing() {
        let (registry, queue, _store) = fixtures().await;
        registry
            .register(&automation_with_schedule("0 9 * * 1"))
            .await;

        // 09:01 Monday
        let off_minute = WallClock {
            minute: 1,
            hour: 9,
            weekday: 1,
        };
        assert_eq!(run_tick(&registry, &queue, off_minute).await, 0);

        // 09:00 Tuesday
        let off_day = WallClock {
            minute: 0,
            hour: 9,
            weekday: 2,
        };
        assert_eq!(run_tick(&registry, &queue, off_day).await, 0);

        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trigger_lines_fire_independently() {
        let (registry, queue, _store) = fixtures().await;
        let automation = automation_with_schedule("0 9 * * 1\n30 14 * * 5");
        registry.register(&automation).await;

        // Monday 09:00 matches only the first line.
        let monday = WallClock {
            minute: 0,
            hour: 9,
            weekday: 1,
        };
        assert_eq!(run_tick(&registry, &queue, monday).await, 1);

        // Friday 14:30 matches only the second line.
        let friday = WallClock {
            minute: 30,
            hour: 14,
            weekday: 5,
        };
        assert_eq!(run_tick(&registry, &queue, friday).await, 1);

        let first = queue.claim().await.unwrap().unwrap();
        let second = queue.claim().await.unwrap().unwrap();
        assert_ne!(first.dedup_key, second.dedup_key);
    }

    #[tokio::test]
    async fn repeated_tick_same_minute_is_deduped() {
        let (registry, queue, _store) = fixtures().await;
        registry
            .register(&automation_with_schedule("0 9 * * 1"))
            .await;

        let clock = WallClock {
            minute: 0,
            hour: 9,
            weekday: 1,
        };
        assert_eq!(run_tick(&registry, &queue, clock).await, 1);
        // Same minute seen again (tick interval shorter than a minute):
        // the still-queued job suppresses a duplicate.
        assert_eq!(run_tick(&registry, &queue, clock).await, 0);
    }

    #[tokio::test]
    async fn multiple_automations_match_in_one_tick() {
        let (registry, queue, _store) = fixtures().await;
        registry
            .register(&automation_with_schedule("0 9 * * 1"))
            .await;
        registry
            .register(&automation_with_schedule("0 9 * * 0,1,2"))
            .await;

        let clock = WallClock {
            minute: 0,
            hour: 9,
            weekday: 1,
        };
        assert_eq!(run_tick(&registry, &queue, clock).await, 2);
    }
}
