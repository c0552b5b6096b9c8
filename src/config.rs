use std::path::PathBuf;
use std::time::Duration;

use crate::core::store::types::AgentKind;

/// Engine-wide configuration, resolved once at startup from the environment.
/// Every knob the components read lives here; nothing reads `std::env` after
/// boot, so tests can construct arbitrary configurations directly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub event_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    pub projects_dir: PathBuf,
    pub github_token: String,
    pub github_owner: String,
    pub queue_processor_enabled: bool,
    pub multi_agent_events: bool,
    pub suite_url: String,

    pub sandbox_image: String,
    /// Program invoked for host-mode kinds (deployer, healthcheck).
    pub agent_program: String,
    pub container_memory_mb: u64,
    pub container_cpus: f64,

    pub log_flush_interval: Duration,
    pub log_ring_capacity: usize,
    pub router_poll_interval: Duration,
    pub queue_poll_interval: Duration,
    pub processed_lru_capacity: usize,
    pub result_scan_limit: usize,
    pub comment_max_len: usize,
    pub comment_truncate_at: usize,
    pub callback_timeout: Duration,

    pub triage_timeout: Duration,
    pub coding_timeout: Duration,
    pub reviewer_timeout: Duration,
    pub deployer_timeout: Duration,
    pub verifier_timeout: Duration,
    pub auditor_timeout: Duration,
    pub healthcheck_timeout: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("VIBEFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".vibeflow")
            });

        let suite_port: u16 = env_parse("VIBE_SUITE_PORT", 3010);
        let suite_url = std::env::var("VIBE_SUITE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", suite_port));

        Self {
            port: env_parse("PORT", 3020),
            database_path: env_path("DATABASE_PATH", data_dir.join("engine.db")),
            event_dir: env_path("EVENT_DIR", data_dir.join("events")),
            workspaces_dir: env_path("WORKSPACES_DIR", data_dir.join("workspaces")),
            projects_dir: env_path("PROJECTS_DIR", data_dir.join("projects")),
            github_token: std::env::var("GITHUB_TOKEN").unwrap_or_default(),
            github_owner: std::env::var("GITHUB_OWNER").unwrap_or_default(),
            queue_processor_enabled: std::env::var("ENABLE_QUEUE_PROCESSOR")
                .map(|v| v != "false")
                .unwrap_or(true),
            multi_agent_events: std::env::var("USE_MULTI_AGENT_EVENTS")
                .map(|v| v == "true")
                .unwrap_or(false),
            suite_url,
            ..Self::defaults(data_dir)
        }
    }

    /// Baseline configuration rooted at `data_dir`. Tests start from this and
    /// override the fields they exercise.
    pub fn defaults(data_dir: PathBuf) -> Self {
        Self {
            port: 3020,
            database_path: data_dir.join("engine.db"),
            event_dir: data_dir.join("events"),
            workspaces_dir: data_dir.join("workspaces"),
            projects_dir: data_dir.join("projects"),
            github_token: String::new(),
            github_owner: String::new(),
            queue_processor_enabled: true,
            multi_agent_events: false,
            suite_url: "http://localhost:3010".to_string(),

            sandbox_image: "vibeflow-agent:latest".to_string(),
            agent_program: "vibeflow-agent".to_string(),
            container_memory_mb: 2048,
            container_cpus: 1.0,

            log_flush_interval: Duration::from_secs(1),
            log_ring_capacity: 50,
            router_poll_interval: Duration::from_secs(5),
            queue_poll_interval: Duration::from_secs(5),
            processed_lru_capacity: 1000,
            result_scan_limit: 1024 * 1024,
            comment_max_len: 10_000,
            comment_truncate_at: 9_900,
            callback_timeout: Duration::from_secs(10),

            triage_timeout: Duration::from_secs(10 * 60),
            coding_timeout: Duration::from_secs(120 * 60),
            reviewer_timeout: Duration::from_secs(30 * 60),
            deployer_timeout: Duration::from_secs(30 * 60),
            verifier_timeout: Duration::from_secs(30 * 60),
            auditor_timeout: Duration::from_secs(45 * 60),
            healthcheck_timeout: Duration::from_secs(60 * 60),
        }
    }

    pub fn timeout_for(&self, kind: AgentKind) -> Duration {
        match kind {
            AgentKind::Triage => self.triage_timeout,
            AgentKind::Coding => self.coding_timeout,
            AgentKind::Reviewer => self.reviewer_timeout,
            AgentKind::Deployer => self.deployer_timeout,
            AgentKind::Verifier => self.verifier_timeout,
            AgentKind::Auditor => self.auditor_timeout,
            AgentKind::Healthcheck => self.healthcheck_timeout,
        }
    }

    /// Base URL agents use to reach this engine (events, log queries).
    pub fn engine_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}
