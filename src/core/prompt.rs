//! Prompt construction seam. The engine treats prompt text as opaque; this
//! default builder assembles a sectioned markdown brief per agent kind, and
//! deployments can swap in their own builder behind the trait.

use crate::core::agents::AgentSpawnRequest;
use crate::core::store::types::{AgentKind, TaskRecord};

pub trait PromptBuilder: Send + Sync {
    fn build(&self, request: &AgentSpawnRequest, task: &TaskRecord) -> String;
}

#[derive(Clone, Default)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, request: &AgentSpawnRequest, task: &TaskRecord) -> String {
        let mut parts = Vec::new();

        parts.push(format!("# {}: {}\n", role_heading(request.kind), request.title));
        parts.push(format!("Task: {}\nRepository: {}\n", request.task_id, request.repo));

        if !request.description.is_empty() {
            parts.push(format!("## Description\n{}\n", request.description));
        }
        if task.investigation_only {
            parts.push(
                "## Mode\nInvestigation only. Report findings; do not push changes.\n".to_string(),
            );
        }
        if let Some(plan) = &task.execution_plan {
            parts.push(format!(
                "## Execution plan\n```json\n{}\n```\n",
                serde_json::to_string_pretty(plan).unwrap_or_default()
            ));
        }
        if let (Some(number), Some(url)) = (request.pr_number, request.pr_url.as_deref()) {
            parts.push(format!("## Pull request\n#{} — {}\n", number, url));
        }
        if let Some(branch) = request.branch.as_deref().or(request.existing_branch.as_deref()) {
            parts.push(format!("## Branch\n{}\n", branch));
        }
        if let Some(feedback) = &request.review_feedback {
            parts.push(format!("## Review feedback to address\n{}\n", feedback));
        }
        if let Some(url) = &request.deployment_url {
            parts.push(format!("## Deployment\n{}\n", url));
        }
        if let Some(areas) = &request.focus_areas
            && !areas.is_empty()
        {
            parts.push(format!(
                "## Focus areas\n{}\n",
                areas
                    .iter()
                    .map(|a| format!("- {}", a))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        parts.join("\n")
    }
}

fn role_heading(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Triage => "TRIAGE",
        AgentKind::Coding => "IMPLEMENT",
        AgentKind::Reviewer => "REVIEW",
        AgentKind::Deployer => "DEPLOY",
        AgentKind::Verifier => "VERIFY",
        AgentKind::Auditor => "AUDIT",
        AgentKind::Healthcheck => "HEALTHCHECK",
    }
}
