use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution plan produced by a triage agent. Only the rich shape exists;
/// the router persists it verbatim onto the task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub summary: String,
    pub affected_files: Vec<AffectedFile>,
    pub steps: Vec<String>,
    pub testing_strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_complexity: Option<Complexity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedFile {
    pub path: String,
    pub action: FileAction,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseResolution {
    AlreadyResolved,
    Duplicate,
    Invalid,
    WontFix,
    NoActionNeeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub description: String,
    pub steps: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FindingSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingSeverity::Low => "low",
            FindingSeverity::Medium => "medium",
            FindingSeverity::High => "high",
            FindingSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Bug,
    Ux,
    Performance,
    Security,
    Accessibility,
}

impl FindingCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingCategory::Bug => "bug",
            FindingCategory::Ux => "ux",
            FindingCategory::Performance => "performance",
            FindingCategory::Security => "security",
            FindingCategory::Accessibility => "accessibility",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFindingBody {
    pub severity: FindingSeverity,
    pub category: FindingCategory,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// Domain event payload, discriminated by the `type` field. The router is
/// exhaustive over this sum; kinds nobody recognizes land in `Unknown` and
/// are warn-logged without being marked processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "task.assigned", rename_all = "camelCase")]
    TaskAssigned {
        task_id: String,
        title: String,
        #[serde(default)]
        description: String,
        repo: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repos: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        investigation_only: Option<bool>,
    },
    #[serde(rename = "task.plan.created", rename_all = "camelCase")]
    TaskPlanCreated {
        task_id: String,
        repo: String,
        plan: ExecutionPlan,
    },
    #[serde(rename = "task.closed", rename_all = "camelCase")]
    TaskClosed {
        task_id: String,
        reason: String,
        resolution: CloseResolution,
    },
    #[serde(rename = "deploy.requested", rename_all = "camelCase")]
    DeployRequested {
        task_id: String,
        repo: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
    },
    #[serde(rename = "pr.created", rename_all = "camelCase")]
    PrCreated {
        task_id: String,
        repo: String,
        pr_number: i64,
        pr_url: String,
        branch: String,
    },
    #[serde(rename = "pr.updated", rename_all = "camelCase")]
    PrUpdated {
        task_id: String,
        repo: String,
        pr_number: i64,
        pr_url: String,
        branch: String,
    },
    #[serde(rename = "pr.changes.requested", rename_all = "camelCase")]
    PrChangesRequested {
        task_id: String,
        repo: String,
        pr_number: i64,
        branch: String,
        review_comments: String,
    },
    #[serde(rename = "pr.merged", rename_all = "camelCase")]
    PrMerged {
        task_id: String,
        repo: String,
        pr_number: i64,
        merge_commit: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_sha: Option<String>,
    },
    #[serde(rename = "deploy.completed", rename_all = "camelCase")]
    DeployCompleted {
        task_id: String,
        repo: String,
        url: String,
        status: String,
    },
    #[serde(rename = "deploy.failed", rename_all = "camelCase")]
    DeployFailed {
        task_id: String,
        repo: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logs: Option<String>,
    },
    #[serde(rename = "verify.passed", rename_all = "camelCase")]
    VerifyPassed {
        task_id: String,
        repo: String,
        summary: String,
    },
    #[serde(rename = "verify.failed", rename_all = "camelCase")]
    VerifyFailed {
        task_id: String,
        repo: String,
        bug: BugReport,
    },
    #[serde(rename = "audit.requested", rename_all = "camelCase")]
    AuditRequested {
        task_id: String,
        repo: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        focus_areas: Option<Vec<String>>,
    },
    #[serde(rename = "audit.finding", rename_all = "camelCase")]
    AuditFinding {
        task_id: String,
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        finding: AuditFindingBody,
    },
    #[serde(rename = "audit.completed", rename_all = "camelCase")]
    AuditCompleted {
        task_id: String,
        repo: String,
        summary: String,
        findings_count: i64,
        duration: f64,
    },
    #[serde(rename = "agent.escalation", rename_all = "camelCase")]
    AgentEscalation {
        task_id: String,
        agent_id: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Catch-all for kinds this engine does not recognize.
    #[serde(untagged)]
    Unknown(serde_json::Value),
}

impl EventPayload {
    pub fn kind(&self) -> &str {
        match self {
            EventPayload::TaskAssigned { .. } => "task.assigned",
            EventPayload::TaskPlanCreated { .. } => "task.plan.created",
            EventPayload::TaskClosed { .. } => "task.closed",
            EventPayload::DeployRequested { .. } => "deploy.requested",
            EventPayload::PrCreated { .. } => "pr.created",
            EventPayload::PrUpdated { .. } => "pr.updated",
            EventPayload::PrChangesRequested { .. } => "pr.changes.requested",
            EventPayload::PrMerged { .. } => "pr.merged",
            EventPayload::DeployCompleted { .. } => "deploy.completed",
            EventPayload::DeployFailed { .. } => "deploy.failed",
            EventPayload::VerifyPassed { .. } => "verify.passed",
            EventPayload::VerifyFailed { .. } => "verify.failed",
            EventPayload::AuditRequested { .. } => "audit.requested",
            EventPayload::AuditFinding { .. } => "audit.finding",
            EventPayload::AuditCompleted { .. } => "audit.completed",
            EventPayload::AgentEscalation { .. } => "agent.escalation",
            EventPayload::Unknown(value) => value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown"),
        }
    }
}

/// One spool record: envelope fields plus the flattened payload, exactly as
/// written to the event file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}
