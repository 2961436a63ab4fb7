//! Core types for the automation system.
//!
//! An automation is a persistent, user-owned instruction to append fixed
//! content to a file in a repository on a schedule, committed under the
//! owner's identity. Each of its trigger lines fires independently.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScheduleError;

/// Day names indexed by trigger day number (0 = Sunday).
const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A user on whose behalf automations run. Commits are always authored
/// as this user, never as the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Provider access token as stored. Wrapped in a `SecretString`
    /// by the credential resolver before it reaches the worker.
    #[serde(skip_serializing)]
    pub access_token: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Commit author name: display name, falling back to the username.
    pub fn author_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Commit author email: the address on record, or a synthesized
    /// `<username>@<provider_domain>` when none is stored.
    pub fn author_email(&self, provider_domain: &str) -> String {
        match &self.email {
            Some(email) if !email.is_empty() => email.clone(),
            _ => format!("{}@{}", self.username, provider_domain),
        }
    }
}

/// A remote repository an automation targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// `owner/name` as known to the provider.
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// Deterministic working-copy key shared by every automation with
    /// the same (owner, repository) pair.
    pub fn working_copy_key(&self) -> String {
        format!("{}-{}", self.owner_id, self.full_name)
    }
}

/// A scheduled repository mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: Uuid,
    /// Owner; never changes after creation.
    pub user_id: Uuid,
    pub repository_id: Uuid,
    /// Repository-relative path of the file to append to.
    pub file_path: String,
    /// Literal content appended on every run.
    pub content: String,
    /// One or more newline-separated trigger-time lines.
    pub schedule: String,
    /// Derived human-readable schedule text, display only.
    pub description: String,
    pub active: bool,
    /// Soft-delete flag; in-flight jobs are not retracted.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full context a worker needs for one execution, resolved from the
/// authoritative store at claim time.
#[derive(Debug, Clone)]
pub struct AutomationContext {
    pub automation: Automation,
    pub user: User,
    pub repository: Repository,
}

/// One parsed trigger line: `minute hour * * day-set`.
///
/// Only minute, hour, and day-of-week are evaluated; the two middle
/// fields are accepted as any token and never consulted. Day numbering
/// is 0 = Sunday through 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub minute: u32,
    pub hour: u32,
    pub days: Vec<u32>,
}

impl TriggerSpec {
    /// Parse a single trigger line. Exactly five whitespace-separated
    /// fields are required.
    pub fn parse(line: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount {
                found: fields.len(),
            });
        }

        let minute = parse_field(fields[0], "minute", 59)?;
        let hour = parse_field(fields[1], "hour", 23)?;
        // fields[2] (day-of-month) and fields[3] (month) are ignored.

        let mut days = Vec::new();
        for part in fields[4].split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            days.push(parse_field(part, "day-of-week", 6)?);
        }
        if days.is_empty() {
            return Err(ScheduleError::EmptyDaySet);
        }

        Ok(Self { minute, hour, days })
    }

    /// True when the given wall-clock components match this trigger.
    pub fn matches(&self, minute: u32, hour: u32, weekday: u32) -> bool {
        self.minute == minute && self.hour == hour && self.days.contains(&weekday)
    }

    /// Human-readable form, e.g. `At 09:00 on Mon, Fri`.
    pub fn describe(&self) -> String {
        let days: Vec<&str> = self
            .days
            .iter()
            .map(|&d| DAY_NAMES[d as usize])
            .collect();
        format!("At {:02}:{:02} on {}", self.hour, self.minute, days.join(", "))
    }
}

fn parse_field(value: &str, field: &'static str, max: u32) -> Result<u32, ScheduleError> {
    let parsed: u32 = value.parse().map_err(|_| ScheduleError::InvalidNumber {
        field,
        value: value.to_string(),
    })?;
    if parsed > max {
        return Err(ScheduleError::OutOfRange {
            field,
            value: parsed,
            max,
        });
    }
    Ok(parsed)
}

/// Describe a full schedule for display; used to derive
/// [`Automation::description`] at create/update time.
pub fn describe_schedule(specs: &[TriggerSpec]) -> String {
    specs
        .iter()
        .map(TriggerSpec::describe)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a repository-relative file path.
///
/// Rejects traversal segments, absolute paths, backslashes, and NUL.
pub fn validate_file_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("file path is empty".to_string());
    }
    if path.starts_with('/') {
        return Err("file path must be relative".to_string());
    }
    if path.contains('\\') {
        return Err("file path must use forward slashes".to_string());
    }
    if path.contains('\0') {
        return Err("file path contains NUL".to_string());
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err("file path contains a traversal segment".to_string());
    }
    Ok(())
}

/// Best-effort deduplication key for a job: automation id plus the
/// index of the trigger line that fired.
pub fn dedup_key(automation_id: Uuid, trigger_index: usize) -> String {
    format!("{automation_id}:{trigger_index}")
}

/// Lifecycle state of a queued execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Terminal states are never claimed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// An execution request. Carries identifiers only — credentials are
/// re-resolved by the worker at claim time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub user_id: Uuid,
    pub dedup_key: String,
    pub status: JobStatus,
    /// Attempts started so far (incremented when claimed).
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// Earliest instant the job may be claimed (advanced by backoff).
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome tag of one completed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Success => write!(f, "success"),
            ExecutionOutcome::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for ExecutionOutcome {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionOutcome::Success),
            "failure" => Ok(ExecutionOutcome::Failure),
            other => Err(format!("unknown execution outcome: {other}")),
        }
    }
}

/// Immutable record of one completed attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub user_id: Uuid,
    pub outcome: ExecutionOutcome,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn new(
        automation_id: Uuid,
        user_id: Uuid,
        outcome: ExecutionOutcome,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            automation_id,
            user_id,
            outcome,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
