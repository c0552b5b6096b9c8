mod lifecycle;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::core::agents::AgentLifecycle;
use crate::core::prompt::DefaultPromptBuilder;
use crate::core::store::Store;
use crate::core::store::tests::sample_task;

pub(crate) use fake::FakeDriver;

pub(crate) struct Harness {
    pub lifecycle: Arc<AgentLifecycle>,
    pub store: Store,
    pub driver: Arc<FakeDriver>,
    #[allow(dead_code)]
    pub tempdir: TempDir,
}

pub(crate) async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub(crate) async fn harness_with(tweak: impl FnOnce(&mut EngineConfig)) -> Harness {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig::defaults(tempdir.path().to_path_buf());
    tweak(&mut config);

    let store = Store::open_in_memory().expect("store");
    store.insert_task(&sample_task("t1")).await.expect("task");

    let driver = Arc::new(FakeDriver::new());
    let lifecycle = AgentLifecycle::new(
        Arc::new(config),
        store.clone(),
        driver.clone(),
        driver.clone(),
        Arc::new(DefaultPromptBuilder),
    );
    Harness {
        lifecycle,
        store,
        driver,
        tempdir,
    }
}

/// Poll until `probe` returns true or the deadline passes.
pub(crate) async fn wait_for<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Create a throwaway git repository under `projects/<name>` so non-host
/// agents have something to clone.
pub(crate) fn init_project_repo(projects_dir: &std::path::Path, name: &str) {
    let repo = projects_dir.join(name);
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(repo.join("README.md"), "# fixture\n").unwrap();
    for args in [
        vec!["init", "-q", "-b", "main"],
        vec!["add", "."],
        vec![
            "-c",
            "user.email=ci@example.com",
            "-c",
            "user.name=ci",
            "commit",
            "-q",
            "-m",
            "init",
        ],
    ] {
        let status = std::process::Command::new("git")
            .args(&args)
            .current_dir(&repo)
            .status()
            .expect("git available");
        assert!(status.success(), "git {:?} failed", args);
    }
}

/// Add a branch to a fixture repository (for reviewer / fix-up flows).
pub(crate) fn add_project_branch(projects_dir: &std::path::Path, name: &str, branch: &str) {
    let repo = projects_dir.join(name);
    let status = std::process::Command::new("git")
        .args(["branch", branch])
        .current_dir(&repo)
        .status()
        .expect("git available");
    assert!(status.success());
}
