//! Unified `Database` trait — single async interface for all persistence.
//!
//! Covers users, repositories, automations, the durable job queue, and the
//! append-only execution log. The credential boundary is a separate trait
//! so the worker never touches raw token storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

use crate::automation::{
    Automation, AutomationContext, ExecutionLogEntry, Job, Repository, User,
};
use crate::error::{CredentialError, DatabaseError};

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<(), DatabaseError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    // ── Repositories ────────────────────────────────────────────────

    async fn create_repository(&self, repo: &Repository) -> Result<(), DatabaseError>;

    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>, DatabaseError>;

    // ── Automations ─────────────────────────────────────────────────

    async fn create_automation(&self, automation: &Automation) -> Result<(), DatabaseError>;

    async fn get_automation(&self, id: Uuid) -> Result<Option<Automation>, DatabaseError>;

    async fn update_automation(&self, automation: &Automation) -> Result<(), DatabaseError>;

    async fn set_automation_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError>;

    /// Soft-delete. Jobs already queued for this automation are not
    /// retracted; they resolve to no-ops at claim time.
    async fn delete_automation(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Every automation currently flagged active and not deleted.
    async fn list_active_automations(&self) -> Result<Vec<Automation>, DatabaseError>;

    /// Automation joined with its owner and repository, only while the
    /// automation is active and not deleted. `None` otherwise.
    async fn get_automation_context(
        &self,
        id: Uuid,
    ) -> Result<Option<AutomationContext>, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// A queued or running job with the given dedup key, if any.
    async fn find_active_job(&self, dedup_key: &str) -> Result<Option<Job>, DatabaseError>;

    /// Atomically claim the next due queued job: flips it to running,
    /// increments its attempt counter, and returns it. At most one
    /// caller can claim any given job.
    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError>;

    async fn complete_job(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Requeue a failed attempt for a later retry.
    async fn retry_job(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Mark a job terminally failed.
    async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    // ── Execution log ───────────────────────────────────────────────

    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<(), DatabaseError>;

    async fn list_execution_logs(
        &self,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>, DatabaseError>;
}

/// Credential boundary: resolves a live access token for an owner.
///
/// Called at claim time on every attempt, never cached, so a revoked
/// credential is observed at the latest possible moment.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_access_token(&self, owner_id: Uuid) -> Result<SecretString, CredentialError>;
}

/// Resolver backed by the user table of the authoritative store.
pub struct StoreCredentialResolver {
    store: Arc<dyn Database>,
}

impl StoreCredentialResolver {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialResolver for StoreCredentialResolver {
    async fn resolve_access_token(&self, owner_id: Uuid) -> Result<SecretString, CredentialError> {
        let user = self
            .store
            .get_user(owner_id)
            .await
            .map_err(|e| CredentialError::Unresolvable {
                user_id: owner_id,
                reason: e.to_string(),
            })?
            .ok_or(CredentialError::Missing { user_id: owner_id })?;

        if user.access_token.is_empty() {
            return Err(CredentialError::Missing { user_id: owner_id });
        }

        Ok(SecretString::from(user.access_token))
    }
}
