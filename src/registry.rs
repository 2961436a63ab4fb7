//! Schedule registry — in-memory map from automation id to its parsed
//! trigger list.
//!
//! A derived, rebuildable cache over the authoritative automation
//! store: losing it (process restart) is safe because `reload()`
//! reconstructs it. An explicit component instance owned by the
//! composition root; the CRUD boundary and the time-match loop both
//! receive it by reference.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::automation::{Automation, TriggerSpec};
use crate::error::Result;
use crate::store::Database;

/// One registered automation: owner plus parsed triggers, in schedule
/// line order so trigger indexes stay stable for dedup keys.
#[derive(Debug, Clone)]
pub struct RegisteredAutomation {
    pub automation_id: Uuid,
    pub user_id: Uuid,
    pub triggers: Vec<TriggerSpec>,
}

/// Registry of active automations and their trigger lists.
pub struct ScheduleRegistry {
    entries: RwLock<HashMap<Uuid, RegisteredAutomation>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or re-register) an automation, replacing any existing
    /// entry with a freshly parsed trigger list.
    ///
    /// A line that fails to parse is skipped with a warning; siblings
    /// are unaffected.
    pub async fn register(&self, automation: &Automation) {
        let mut triggers = Vec::new();
        for (index, line) in automation
            .schedule
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .enumerate()
        {
            match TriggerSpec::parse(line) {
                Ok(spec) => triggers.push(spec),
                Err(e) => {
                    tracing::warn!(
                        automation = %automation.id,
                        line_index = index,
                        line,
                        "Skipping unparsable trigger line: {e}"
                    );
                }
            }
        }

        if triggers.is_empty() {
            tracing::warn!(
                automation = %automation.id,
                "Registered automation has no parsable triggers and will never fire"
            );
        }

        let entry = RegisteredAutomation {
            automation_id: automation.id,
            user_id: automation.user_id,
            triggers,
        };

        let mut entries = self.entries.write().await;
        entries.insert(automation.id, entry);
        tracing::debug!(automation = %automation.id, "Automation registered");
    }

    /// Job-submission boundary for the create flow: make a newly
    /// created automation schedulable without a process restart.
    pub async fn schedule_immediately(&self, automation: &Automation) {
        self.register(automation).await;
        tracing::info!(automation = %automation.id, "Automation scheduled");
    }

    /// Remove an automation's entry entirely.
    pub async fn deactivate(&self, automation_id: Uuid) {
        let removed = self.entries.write().await.remove(&automation_id);
        if removed.is_some() {
            tracing::debug!(automation = %automation_id, "Automation deactivated");
        }
    }

    /// Repopulate from every automation currently flagged active.
    /// Returns the number of registered automations.
    pub async fn reload(&self, store: &dyn Database) -> Result<usize> {
        let automations = store.list_active_automations().await?;

        self.entries.write().await.clear();
        for automation in &automations {
            self.register(automation).await;
        }

        tracing::info!(count = automations.len(), "Schedule registry loaded");
        Ok(automations.len())
    }

    /// Consistent snapshot for one tick of the time-match loop.
    pub async fn snapshot(&self) -> Vec<RegisteredAutomation> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, automation_id: Uuid) -> bool {
        self.entries.read().await.contains_key(&automation_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for ScheduleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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
    async fn register_parses_multi_line_schedule() {
        let registry = ScheduleRegistry::new();
        let automation = automation_with_schedule("0 9 * * 1\n30 14 * * 5");
        registry.register(&automation).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].triggers.len(), 2);
        assert_eq!(snapshot[0].user_id, automation.user_id);
    }

    #[tokio::test]
    async fn bad_line_skipped_siblings_kept() {
        let registry = ScheduleRegistry::new();
        let automation = automation_with_schedule("not a cron\n0 9 * * 1");
        registry.register(&automation).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].triggers.len(), 1);
        assert_eq!(snapshot[0].triggers[0].minute, 0);
    }

    #[tokio::test]
    async fn register_replaces_existing_entry() {
        let registry = ScheduleRegistry::new();
        let mut automation = automation_with_schedule("0 9 * * 1");
        registry.register(&automation).await;

        automation.schedule = "15 7 * * 2\n45 18 * * 4".to_string();
        registry.register(&automation).await;

        assert_eq!(registry.len().await, 1);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].triggers.len(), 2);
        assert_eq!(snapshot[0].triggers[0].hour, 7);
    }

    #[tokio::test]
    async fn deactivate_removes_entry() {
        let registry = ScheduleRegistry::new();
        let automation = automation_with_schedule("0 9 * * 1");
        registry.register(&automation).await;
        assert!(registry.contains(automation.id).await);

        registry.deactivate(automation.id).await;
        assert!(!registry.contains(automation.id).await);
        assert!(registry.is_empty().await);

        // Deactivating an unknown id is a no-op.
        registry.deactivate(Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn reload_rebuilds_from_store() {
        use crate::store::LibSqlBackend;

        let store = LibSqlBackend::new_memory().await.unwrap();
        let user = crate::automation::User {
            id: Uuid::new_v4(),
            username: "octocat".to_string(),
            display_name: None,
            email: None,
            access_token: "tok".to_string(),
            created_at: Utc::now(),
        };
        let repo = crate::automation::Repository {
            id: Uuid::new_v4(),
            owner_id: user.id,
            full_name: "octocat/hello-world".to_string(),
            clone_url: "https://example.com/r.git".to_string(),
            default_branch: "main".to_string(),
            created_at: Utc::now(),
        };
        store.create_user(&user).await.unwrap();
        store.create_repository(&repo).await.unwrap();

        let mut active = automation_with_schedule("0 9 * * 1");
        active.user_id = user.id;
        active.repository_id = repo.id;
        let mut inactive = automation_with_schedule("0 10 * * 2");
        inactive.user_id = user.id;
        inactive.repository_id = repo.id;
        inactive.active = false;
        store.create_automation(&active).await.unwrap();
        store.create_automation(&inactive).await.unwrap();

        let registry = ScheduleRegistry::new();
        // A stale entry from before the restart should disappear.
        registry
            .register(&automation_with_schedule("0 0 * * 0"))
            .await;

        let count = registry.reload(&store).await.unwrap();
        assert_eq!(count, 1);
        assert!(registry.contains(active.id).await);
        assert!(!registry.contains(inactive.id).await);
    }
}
