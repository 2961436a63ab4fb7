//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. The in-memory variant
//! backs the test suite.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::automation::{
    Automation, AutomationContext, ExecutionLogEntry, ExecutionOutcome, Job, JobStatus,
    Repository, User,
};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;

const USER_COLUMNS: &str = "id, username, display_name, email, access_token, created_at";
const REPOSITORY_COLUMNS: &str = "id, owner_id, full_name, clone_url, default_branch, created_at";
const AUTOMATION_COLUMNS: &str = "id, user_id, repository_id, file_path, content, schedule, \
                                  description, active, deleted, created_at, updated_at";
const JOB_COLUMNS: &str = "id, automation_id, user_id, dedup_key, status, attempts, \
                           max_attempts, last_error, next_attempt_at, created_at, updated_at";
const LOG_COLUMNS: &str = "id, automation_id, user_id, outcome, message, created_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {what} uuid '{s}': {e}")))
}

fn opt_text(value: &Option<String>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.clone()),
        None => libsql::Value::Null,
    }
}

fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("user id: {e}")))?;
    let username: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("username: {e}")))?;
    let display_name: Option<String> = row.get(2).ok();
    let email: Option<String> = row.get(3).ok();
    let access_token: String = row
        .get(4)
        .map_err(|e| DatabaseError::Serialization(format!("access_token: {e}")))?;
    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Serialization(format!("user created_at: {e}")))?;

    Ok(User {
        id: parse_uuid(&id_str, "user")?,
        username,
        display_name,
        email,
        access_token,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_repository(row: &libsql::Row) -> Result<Repository, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("repository id: {e}")))?;
    let owner_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("owner_id: {e}")))?;
    let full_name: String = row
        .get(2)
        .map_err(|e| DatabaseError::Serialization(format!("full_name: {e}")))?;
    let clone_url: String = row
        .get(3)
        .map_err(|e| DatabaseError::Serialization(format!("clone_url: {e}")))?;
    let default_branch: String = row
        .get(4)
        .map_err(|e| DatabaseError::Serialization(format!("default_branch: {e}")))?;
    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Serialization(format!("repository created_at: {e}")))?;

    Ok(Repository {
        id: parse_uuid(&id_str, "repository")?,
        owner_id: parse_uuid(&owner_str, "owner")?,
        full_name,
        clone_url,
        default_branch,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_automation(row: &libsql::Row) -> Result<Automation, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("automation id: {e}")))?;
    let user_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("user_id: {e}")))?;
    let repo_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Serialization(format!("repository_id: {e}")))?;
    let file_path: String = row
        .get(3)
        .map_err(|e| DatabaseError::Serialization(format!("file_path: {e}")))?;
    let content: String = row
        .get(4)
        .map_err(|e| DatabaseError::Serialization(format!("content: {e}")))?;
    let schedule: String = row
        .get(5)
        .map_err(|e| DatabaseError::Serialization(format!("schedule: {e}")))?;
    let description: String = row
        .get(6)
        .map_err(|e| DatabaseError::Serialization(format!("description: {e}")))?;
    let active: i64 = row
        .get(7)
        .map_err(|e| DatabaseError::Serialization(format!("active: {e}")))?;
    let deleted: i64 = row
        .get(8)
        .map_err(|e| DatabaseError::Serialization(format!("deleted: {e}")))?;
    let created_str: String = row
        .get(9)
        .map_err(|e| DatabaseError::Serialization(format!("automation created_at: {e}")))?;
    let updated_str: String = row
        .get(10)
        .map_err(|e| DatabaseError::Serialization(format!("automation updated_at: {e}")))?;

    Ok(Automation {
        id: parse_uuid(&id_str, "automation")?,
        user_id: parse_uuid(&user_str, "user")?,
        repository_id: parse_uuid(&repo_str, "repository")?,
        file_path,
        content,
        schedule,
        description,
        active: active != 0,
        deleted: deleted != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("job id: {e}")))?;
    let automation_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("job automation_id: {e}")))?;
    let user_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Serialization(format!("job user_id: {e}")))?;
    let dedup_key: String = row
        .get(3)
        .map_err(|e| DatabaseError::Serialization(format!("dedup_key: {e}")))?;
    let status_str: String = row
        .get(4)
        .map_err(|e| DatabaseError::Serialization(format!("job status: {e}")))?;
    let attempts: i64 = row
        .get(5)
        .map_err(|e| DatabaseError::Serialization(format!("attempts: {e}")))?;
    let max_attempts: i64 = row
        .get(6)
        .map_err(|e| DatabaseError::Serialization(format!("max_attempts: {e}")))?;
    let last_error: Option<String> = row.get(7).ok();
    let next_attempt_str: String = row
        .get(8)
        .map_err(|e| DatabaseError::Serialization(format!("next_attempt_at: {e}")))?;
    let created_str: String = row
        .get(9)
        .map_err(|e| DatabaseError::Serialization(format!("job created_at: {e}")))?;
    let updated_str: String = row
        .get(10)
        .map_err(|e| DatabaseError::Serialization(format!("job updated_at: {e}")))?;

    Ok(Job {
        id: parse_uuid(&id_str, "job")?,
        automation_id: parse_uuid(&automation_str, "automation")?,
        user_id: parse_uuid(&user_str, "user")?,
        dedup_key,
        status: JobStatus::from_str(&status_str).map_err(DatabaseError::Serialization)?,
        attempts: attempts as u32,
        max_attempts: max_attempts as u32,
        last_error,
        next_attempt_at: parse_datetime(&next_attempt_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_log_entry(row: &libsql::Row) -> Result<ExecutionLogEntry, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("log id: {e}")))?;
    let automation_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("log automation_id: {e}")))?;
    let user_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Serialization(format!("log user_id: {e}")))?;
    let outcome_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Serialization(format!("outcome: {e}")))?;
    let message: String = row
        .get(4)
        .map_err(|e| DatabaseError::Serialization(format!("message: {e}")))?;
    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Serialization(format!("log created_at: {e}")))?;

    Ok(ExecutionLogEntry {
        id: parse_uuid(&id_str, "log entry")?,
        automation_id: parse_uuid(&automation_str, "automation")?,
        user_id: parse_uuid(&user_str, "user")?,
        outcome: ExecutionOutcome::from_str(&outcome_str).map_err(DatabaseError::Serialization)?,
        message,
        created_at: parse_datetime(&created_str),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO users (id, username, display_name, email, access_token, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.to_string(),
                    user.username.clone(),
                    opt_text(&user.display_name),
                    opt_text(&user.email),
                    user.access_token.clone(),
                    user.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_user: {e}")))?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    // ── Repositories ────────────────────────────────────────────────

    async fn create_repository(&self, repo: &Repository) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO repositories (id, owner_id, full_name, clone_url, default_branch, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    repo.id.to_string(),
                    repo.owner_id.to_string(),
                    repo.full_name.clone(),
                    repo.clone_url.clone(),
                    repo.default_branch.clone(),
                    repo.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_repository: {e}")))?;
        Ok(())
    }

    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_repository: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_repository(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_repository: {e}"))),
        }
    }

    // ── Automations ─────────────────────────────────────────────────

    async fn create_automation(&self, automation: &Automation) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO automations (id, user_id, repository_id, file_path, content, schedule, \
                 description, active, deleted, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    automation.id.to_string(),
                    automation.user_id.to_string(),
                    automation.repository_id.to_string(),
                    automation.file_path.clone(),
                    automation.content.clone(),
                    automation.schedule.clone(),
                    automation.description.clone(),
                    automation.active as i64,
                    automation.deleted as i64,
                    automation.created_at.to_rfc3339(),
                    automation.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_automation: {e}")))?;
        Ok(())
    }

    async fn get_automation(&self, id: Uuid) -> Result<Option<Automation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {AUTOMATION_COLUMNS} FROM automations WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_automation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_automation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_automation: {e}"))),
        }
    }

    async fn update_automation(&self, automation: &Automation) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE automations SET file_path=?1, content=?2, schedule=?3, description=?4, \
                 active=?5, updated_at=?6 WHERE id=?7",
                params![
                    automation.file_path.clone(),
                    automation.content.clone(),
                    automation.schedule.clone(),
                    automation.description.clone(),
                    automation.active as i64,
                    now,
                    automation.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_automation: {e}")))?;
        Ok(())
    }

    async fn set_automation_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE automations SET active=?1, updated_at=?2 WHERE id=?3",
                params![active as i64, now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_automation_active: {e}")))?;
        Ok(())
    }

    async fn delete_automation(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE automations SET deleted=1, active=0, updated_at=?1 WHERE id=?2 AND deleted=0",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_automation: {e}")))?;
        Ok(count > 0)
    }

    async fn list_active_automations(&self) -> Result<Vec<Automation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUTOMATION_COLUMNS} FROM automations \
                     WHERE active = 1 AND deleted = 0 ORDER BY created_at"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_automations: {e}")))?;

        let mut automations = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_automation(&row) {
                Ok(a) => automations.push(a),
                Err(e) => tracing::warn!("Skipping automation row: {e}"),
            }
        }
        Ok(automations)
    }

    async fn get_automation_context(
        &self,
        id: Uuid,
    ) -> Result<Option<AutomationContext>, DatabaseError> {
        let Some(automation) = self.get_automation(id).await? else {
            return Ok(None);
        };
        if !automation.active || automation.deleted {
            return Ok(None);
        }

        let user = self
            .get_user(automation.user_id)
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "user".to_string(),
                id: automation.user_id.to_string(),
            })?;
        let repository = self.get_repository(automation.repository_id).await?.ok_or(
            DatabaseError::NotFound {
                entity: "repository".to_string(),
                id: automation.repository_id.to_string(),
            },
        )?;

        Ok(Some(AutomationContext {
            automation,
            user,
            repository,
        }))
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO jobs (id, automation_id, user_id, dedup_key, status, attempts, \
                 max_attempts, last_error, next_attempt_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    job.id.to_string(),
                    job.automation_id.to_string(),
                    job.user_id.to_string(),
                    job.dedup_key.clone(),
                    job.status.to_string(),
                    job.attempts as i64,
                    job.max_attempts as i64,
                    opt_text(&job.last_error),
                    job.next_attempt_at.to_rfc3339(),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;
        Ok(())
    }

    async fn find_active_job(&self, dedup_key: &str) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE dedup_key = ?1 AND status IN ('queued', 'running') LIMIT 1"
                ),
                params![dedup_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_active_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_active_job: {e}"))),
        }
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        // Single-statement claim: no two callers can flip the same row.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE jobs SET status='running', attempts = attempts + 1, updated_at = ?1 \
                     WHERE id = ( \
                         SELECT id FROM jobs \
                         WHERE status = 'queued' AND next_attempt_at <= ?2 \
                         ORDER BY next_attempt_at, created_at LIMIT 1 \
                     ) \
                     RETURNING {JOB_COLUMNS}"
                ),
                params![now.to_rfc3339(), now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_next_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("claim_next_job: {e}"))),
        }
    }

    async fn complete_job(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE jobs SET status='succeeded', last_error=NULL, updated_at=?1 WHERE id=?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_job: {e}")))?;
        Ok(())
    }

    async fn retry_job(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE jobs SET status='queued', last_error=?1, next_attempt_at=?2, updated_at=?3 \
                 WHERE id=?4",
                params![error, next_attempt_at.to_rfc3339(), now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("retry_job: {e}")))?;
        Ok(())
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE jobs SET status='failed', last_error=?1, updated_at=?2 WHERE id=?3",
                params![error, now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fail_job: {e}")))?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    // ── Execution log ───────────────────────────────────────────────

    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO execution_logs (id, automation_id, user_id, outcome, message, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id.to_string(),
                    entry.automation_id.to_string(),
                    entry.user_id.to_string(),
                    entry.outcome.to_string(),
                    entry.message.clone(),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_execution_log: {e}")))?;
        Ok(())
    }

    async fn list_execution_logs(
        &self,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM execution_logs \
                     WHERE automation_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ),
                params![automation_id.to_string(), limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_execution_logs: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_log_entry(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping execution log row: {e}"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{dedup_key, ExecutionOutcome};

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "octocat".to_string(),
            display_name: Some("The Octocat".to_string()),
            email: None,
            access_token: "ghp_test".to_string(),
            created_at: Utc::now(),
        }
    }

    fn sample_repository(owner_id: Uuid) -> Repository {
        Repository {
            id: Uuid::new_v4(),
            owner_id,
            full_name: "octocat/hello-world".to_string(),
            clone_url: "https://github.com/octocat/hello-world.git".to_string(),
            default_branch: "main".to_string(),
            created_at: Utc::now(),
        }
    }

    fn sample_automation(user_id: Uuid, repository_id: Uuid) -> Automation {
        Automation {
            id: Uuid::new_v4(),
            user_id,
            repository_id,
            file_path: "log.md".to_string(),
            content: "- entry".to_string(),
            schedule: "0 9 * * 1".to_string(),
            description: "At 09:00 on Mon".to_string(),
            active: true,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_job(automation_id: Uuid, user_id: Uuid) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            automation_id,
            user_id,
            dedup_key: dedup_key(automation_id, 0),
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn user_roundtrip() {
        let db = backend().await;
        let user = sample_user();
        db.create_user(&user).await.unwrap();

        let loaded = db.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.username, "octocat");
        assert_eq!(loaded.display_name.as_deref(), Some("The Octocat"));
        assert!(loaded.email.is_none());
        assert_eq!(loaded.access_token, "ghp_test");

        assert!(db.get_user(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn automation_lifecycle() {
        let db = backend().await;
        let user = sample_user();
        let repo = sample_repository(user.id);
        db.create_user(&user).await.unwrap();
        db.create_repository(&repo).await.unwrap();

        let automation = sample_automation(user.id, repo.id);
        db.create_automation(&automation).await.unwrap();

        let active = db.list_active_automations().await.unwrap();
        assert_eq!(active.len(), 1);

        db.set_automation_active(automation.id, false)
            .await
            .unwrap();
        assert!(db.list_active_automations().await.unwrap().is_empty());

        db.set_automation_active(automation.id, true).await.unwrap();
        assert!(db.delete_automation(automation.id).await.unwrap());
        assert!(db.list_active_automations().await.unwrap().is_empty());
        // Second delete is a no-op
        assert!(!db.delete_automation(automation.id).await.unwrap());
        // The row itself survives (soft delete)
        let loaded = db.get_automation(automation.id).await.unwrap().unwrap();
        assert!(loaded.deleted);
        assert!(!loaded.active);
    }

    #[tokio::test]
    async fn context_join_respects_active_and_deleted() {
        let db = backend().await;
        let user = sample_user();
        let repo = sample_repository(user.id);
        db.create_user(&user).await.unwrap();
        db.create_repository(&repo).await.unwrap();

        let automation = sample_automation(user.id, repo.id);
        db.create_automation(&automation).await.unwrap();

        let ctx = db
            .get_automation_context(automation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.user.id, user.id);
        assert_eq!(ctx.repository.id, repo.id);
        assert_eq!(ctx.automation.file_path, "log.md");

        db.set_automation_active(automation.id, false)
            .await
            .unwrap();
        assert!(db
            .get_automation_context(automation.id)
            .await
            .unwrap()
            .is_none());

        assert!(db
            .get_automation_context(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn claim_flips_exactly_one_job() {
        let db = backend().await;
        let job = sample_job(Uuid::new_v4(), Uuid::new_v4());
        db.insert_job(&job).await.unwrap();

        let claimed = db.claim_next_job(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);

        // Already running — a second claim finds nothing.
        assert!(db.claim_next_job(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_future_jobs() {
        let db = backend().await;
        let mut job = sample_job(Uuid::new_v4(), Uuid::new_v4());
        job.next_attempt_at = Utc::now() + chrono::Duration::seconds(60);
        db.insert_job(&job).await.unwrap();

        assert!(db.claim_next_job(Utc::now()).await.unwrap().is_none());

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(db.claim_next_job(later).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retry_requeues_and_fail_is_terminal() {
        let db = backend().await;
        let job = sample_job(Uuid::new_v4(), Uuid::new_v4());
        db.insert_job(&job).await.unwrap();
        let claimed = db.claim_next_job(Utc::now()).await.unwrap().unwrap();

        let next = Utc::now() + chrono::Duration::seconds(2);
        db.retry_job(claimed.id, "clone failed", next).await.unwrap();
        let requeued = db.get_job(claimed.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.last_error.as_deref(), Some("clone failed"));
        assert_eq!(requeued.attempts, 1);

        db.fail_job(claimed.id, "gave up").await.unwrap();
        let failed = db.get_job(claimed.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.status.is_terminal());
    }

    #[tokio::test]
    async fn find_active_job_by_dedup_key() {
        let db = backend().await;
        let job = sample_job(Uuid::new_v4(), Uuid::new_v4());
        db.insert_job(&job).await.unwrap();

        assert!(db
            .find_active_job(&job.dedup_key)
            .await
            .unwrap()
            .is_some());
        assert!(db.find_active_job("nope").await.unwrap().is_none());

        db.complete_job(job.id).await.unwrap();
        assert!(db.find_active_job(&job.dedup_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_log_append_and_list() {
        let db = backend().await;
        let automation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let entry = ExecutionLogEntry::new(
            automation_id,
            user_id,
            ExecutionOutcome::Success,
            "Successfully executed",
        );
        db.append_execution_log(&entry).await.unwrap();

        let failure = ExecutionLogEntry::new(
            automation_id,
            user_id,
            ExecutionOutcome::Failure,
            "git push failed",
        );
        db.append_execution_log(&failure).await.unwrap();

        let entries = db.list_execution_logs(automation_id, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(db
            .list_execution_logs(Uuid::new_v4(), 10)
            .await
            .unwrap()
            .is_empty());
    }
}
