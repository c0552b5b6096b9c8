//! Per-agent workspace preparation: a fresh directory per agent holding a
//! `repo/` clone and the `task-prompt.md` handed to the sandbox.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::core::scrub::scrub_secrets;
use crate::core::store::types::AgentKind;

pub const PROMPT_FILE: &str = "task-prompt.md";

/// Which branch the cloned repository ends up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchPlan {
    /// Fetch and check out a branch that already exists on the remote
    /// (reviewer and fix-up coding flows).
    Existing(String),
    /// Create a fresh branch from the current head (first-pass coding).
    CreateFromHead(String),
    /// Stay on the default branch.
    DefaultBranch,
}

/// Branch checkout rules, in priority order: explicit `branch`, then
/// `existing_branch`, then a new `agent/<id>` branch for coding agents.
pub fn branch_plan(
    kind: AgentKind,
    branch: Option<&str>,
    existing_branch: Option<&str>,
    agent_id: &str,
) -> BranchPlan {
    if let Some(branch) = branch.filter(|b| !b.is_empty()) {
        return BranchPlan::Existing(branch.to_string());
    }
    if let Some(existing) = existing_branch.filter(|b| !b.is_empty()) {
        return BranchPlan::Existing(existing.to_string());
    }
    if kind == AgentKind::Coding {
        return BranchPlan::CreateFromHead(format!("agent/{}", agent_id));
    }
    BranchPlan::DefaultBranch
}

#[derive(Clone)]
pub struct WorkspaceManager {
    workspaces_dir: PathBuf,
    projects_dir: PathBuf,
    github_owner: String,
    github_token: String,
}

impl WorkspaceManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            workspaces_dir: config.workspaces_dir.clone(),
            projects_dir: config.projects_dir.clone(),
            github_owner: config.github_owner.clone(),
            github_token: config.github_token.clone(),
        }
    }

    pub fn dir_for(&self, agent_id: &str) -> PathBuf {
        self.workspaces_dir.join(agent_id)
    }

    pub fn repo_dir(&self, agent_id: &str) -> PathBuf {
        self.dir_for(agent_id).join("repo")
    }

    /// Create a fresh workspace directory. Host-mode kinds get only the bare
    /// directory; everything else also gets a clone of `repo` on the branch
    /// the plan dictates.
    pub async fn prepare(
        &self,
        agent_id: &str,
        kind: AgentKind,
        repo: &str,
        plan: &BranchPlan,
    ) -> EngineResult<PathBuf> {
        let dir = self.dir_for(agent_id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.ok();
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::Sandbox(format!("create workspace: {}", e)))?;

        if kind.is_host_mode() {
            return Ok(dir);
        }

        let clone_src = self.clone_source(repo);
        let repo_dir = dir.join("repo");
        run_git(&dir, &["clone", &clone_src, "repo"]).await?;

        match plan {
            BranchPlan::Existing(branch) => {
                run_git(&repo_dir, &["fetch", "origin", branch]).await?;
                run_git(&repo_dir, &["checkout", branch]).await?;
            }
            BranchPlan::CreateFromHead(branch) => {
                run_git(&repo_dir, &["checkout", "-b", branch]).await?;
            }
            BranchPlan::DefaultBranch => {}
        }

        debug!(agent_id, repo, ?plan, "workspace ready");
        Ok(dir)
    }

    /// Local project checkout wins over GitHub.
    fn clone_source(&self, repo: &str) -> String {
        let local = self.projects_dir.join(repo);
        if local.is_dir() {
            return local.to_string_lossy().to_string();
        }
        self.github_url(repo)
    }

    fn github_url(&self, repo: &str) -> String {
        if self.github_token.is_empty() {
            format!("https://github.com/{}/{}.git", self.github_owner, repo)
        } else {
            format!(
                "https://{}@github.com/{}/{}.git",
                self.github_token, self.github_owner, repo
            )
        }
    }

    /// Names of locally checked-out project repositories.
    pub async fn list_projects(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.projects_dir).await else {
            return names;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        names
    }

    /// Clone a repository from GitHub into the local projects directory.
    pub async fn clone_into_projects(&self, repo: &str) -> EngineResult<PathBuf> {
        let target = self.projects_dir.join(repo);
        if target.exists() {
            return Err(EngineError::InvalidState(format!(
                "project {} already checked out",
                repo
            )));
        }
        tokio::fs::create_dir_all(&self.projects_dir)
            .await
            .map_err(|e| EngineError::Sandbox(format!("create projects dir: {}", e)))?;
        run_git(&self.projects_dir, &["clone", &self.github_url(repo), repo]).await?;
        Ok(target)
    }

    pub async fn write_prompt(&self, agent_id: &str, prompt: &str) -> EngineResult<PathBuf> {
        let path = self.dir_for(agent_id).join(PROMPT_FILE);
        tokio::fs::write(&path, prompt)
            .await
            .map_err(|e| EngineError::Sandbox(format!("write prompt: {}", e)))?;
        Ok(path)
    }

    pub async fn purge(&self, agent_id: &str) {
        let dir = self.dir_for(agent_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(agent_id, error = %e, "workspace purge failed");
        }
    }
}

async fn run_git(cwd: &Path, args: &[&str]) -> EngineResult<()> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| EngineError::Sandbox(format!("exec git: {}", e)))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(EngineError::Sandbox(scrub_secrets(&format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        ))))
    }
}
