use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Triage,
    Coding,
    Reviewer,
    Deployer,
    Verifier,
    Auditor,
    Healthcheck,
}

impl Default for AgentKind {
    fn default() -> Self {
        AgentKind::Triage
    }
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Triage => "triage",
            AgentKind::Coding => "coding",
            AgentKind::Reviewer => "reviewer",
            AgentKind::Deployer => "deployer",
            AgentKind::Verifier => "verifier",
            AgentKind::Auditor => "auditor",
            AgentKind::Healthcheck => "healthcheck",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "triage" => Some(AgentKind::Triage),
            "coding" => Some(AgentKind::Coding),
            "reviewer" => Some(AgentKind::Reviewer),
            "deployer" => Some(AgentKind::Deployer),
            "verifier" => Some(AgentKind::Verifier),
            "auditor" => Some(AgentKind::Auditor),
            "healthcheck" => Some(AgentKind::Healthcheck),
            _ => None,
        }
    }

    /// Host-mode kinds run as plain child processes on the host instead of
    /// inside a container sandbox; no image is required.
    pub fn is_host_mode(self) -> bool {
        matches!(self, AgentKind::Deployer | AgentKind::Healthcheck)
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Timeout,
    Killed,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Timeout => "timeout",
            AgentStatus::Killed => "killed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "starting" => Some(AgentStatus::Starting),
            "running" => Some(AgentStatus::Running),
            "completed" => Some(AgentStatus::Completed),
            "failed" => Some(AgentStatus::Failed),
            "timeout" => Some(AgentStatus::Timeout),
            "killed" => Some(AgentStatus::Killed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Timeout | AgentStatus::Killed
        )
    }
}

/// One execution of a sandboxed assistant. Mutated only by the lifecycle
/// manager; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub task_id: String,
    pub sandbox_id: Option<String>,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Out,
    Err,
    Combined,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Out => "out",
            LogStream::Err => "err",
            LogStream::Combined => "combined",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "out" => Some(LogStream::Out),
            "err" => Some(LogStream::Err),
            "combined" => Some(LogStream::Combined),
            _ => None,
        }
    }
}

/// Append-only log line owned by an agent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLogLine {
    pub id: i64,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

/// A log line not yet persisted; produced by the per-agent log pipeline.
#[derive(Debug, Clone)]
pub struct NewLogLine {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "queued" => Some(TaskStatus::Queued),
            "assigned" => Some(TaskStatus::Assigned),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Local mirror of an upstream task; carries the minimum needed to route
/// workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub kind: String,
    pub status: TaskStatus,
    pub repo: Option<String>,
    pub repos: Vec<String>,
    pub investigation_only: bool,
    pub execution_plan: Option<serde_json::Value>,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Primary repository: `repo`, falling back to the first of `repos`.
    pub fn primary_repo(&self) -> Option<&str> {
        self.repo
            .as_deref()
            .filter(|r| !r.is_empty())
            .or_else(|| self.repos.first().map(String::as_str).filter(|r| !r.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl QueueEntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueEntryStatus::Queued => "queued",
            QueueEntryStatus::Processing => "processing",
            QueueEntryStatus::Completed => "completed",
            QueueEntryStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(QueueEntryStatus::Queued),
            "processing" => Some(QueueEntryStatus::Processing),
            "completed" => Some(QueueEntryStatus::Completed),
            "failed" => Some(QueueEntryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: i64,
    pub task_id: String,
    pub position: i64,
    pub status: QueueEntryStatus,
    pub queued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Recognized queue settings with parsed values. Unrecognized keys are kept
/// in the table but ignored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSettings {
    pub paused: bool,
    pub stop_on_failure: bool,
    pub max_concurrent: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            paused: false,
            stop_on_failure: false,
            max_concurrent: 1,
        }
    }
}

/// Counts of agent rows grouped by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAnalytics {
    pub total: i64,
    pub starting: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub timeout: i64,
    pub killed: i64,
}

impl AgentAnalytics {
    pub fn active(&self) -> i64 {
        self.starting + self.running
    }

    pub fn terminal(&self) -> i64 {
        self.completed + self.failed + self.timeout + self.killed
    }
}

/// Row in the service `logs` table (router warnings, recovery outcomes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLogLine {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}
