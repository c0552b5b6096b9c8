//! Docker sandbox driver. Container lifecycle goes through the `docker` CLI;
//! output streaming attaches `docker logs -f` to the running container.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{RunningSandbox, SandboxDriver, SandboxSpec, SandboxState, forward_lines};
use crate::core::error::{EngineError, EngineResult};
use crate::core::scrub::scrub_secrets;
use crate::core::store::types::LogStream;

#[derive(Clone, Default)]
pub struct DockerCliDriver;

impl DockerCliDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SandboxDriver for DockerCliDriver {
    async fn image_available(&self, image: &str) -> EngineResult<bool> {
        match docker_cli(&["image", "inspect", image]).await {
            Ok(_) => Ok(true),
            Err(e) if e.contains("No such image") => Ok(false),
            Err(e) => Err(EngineError::Sandbox(e)),
        }
    }

    async fn launch(&self, spec: SandboxSpec) -> EngineResult<RunningSandbox> {
        let container_name = format!("vibeflow-{}", spec.name);
        let memory = format!("{}m", spec.memory_limit_mb);
        let cpus = format!("{}", spec.cpus);
        let mount = format!("{}:/workspace:rw", spec.workspace.display());

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            container_name,
            "--memory".into(),
            memory,
            "--cpus".into(),
            cpus,
            "-v".into(),
            mount,
            "-w".into(),
            "/workspace".into(),
        ];
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let container_id = docker_cli(&arg_refs).await.map_err(EngineError::Sandbox)?;

        debug!(name = %spec.name, container = %container_id, "container started");

        let (log_tx, log_rx) = mpsc::channel(256);
        let (exit_tx, exit_rx) = oneshot::channel();

        stream_logs(container_id.clone(), log_tx);
        wait_for_exit(container_id.clone(), exit_tx);

        Ok(RunningSandbox {
            handle: container_id,
            logs: log_rx,
            exit: exit_rx,
        })
    }

    async fn inspect(&self, handle: &str) -> EngineResult<SandboxState> {
        let out = match docker_cli(&[
            "inspect",
            "-f",
            "{{.State.Running}} {{.State.ExitCode}}",
            handle,
        ])
        .await
        {
            Ok(out) => out,
            Err(e) if e.contains("No such") => return Ok(SandboxState::Gone),
            Err(e) => return Err(EngineError::Sandbox(e)),
        };
        let mut parts = out.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("true"), _) => Ok(SandboxState::Running),
            (Some("false"), Some(code)) => Ok(SandboxState::Exited(code.parse().unwrap_or(-1))),
            _ => Err(EngineError::Sandbox(format!(
                "unexpected inspect output for {}: {}",
                handle, out
            ))),
        }
    }

    async fn kill(&self, handle: &str) -> EngineResult<()> {
        docker_cli(&["kill", handle])
            .await
            .map(|_| ())
            .map_err(EngineError::Sandbox)
    }

    async fn remove(&self, handle: &str) -> EngineResult<()> {
        match docker_cli(&["rm", "-f", handle]).await {
            Ok(_) => Ok(()),
            Err(e) if e.contains("No such") => Ok(()),
            Err(e) => Err(EngineError::Sandbox(e)),
        }
    }
}

/// Follow container output until EOF, forwarding stdout/stderr chunks.
fn stream_logs(container_id: String, tx: mpsc::Sender<super::LogChunk>) {
    tokio::spawn(async move {
        let mut child = match tokio::process::Command::new("docker")
            .args(["logs", "-f", &container_id])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(container = %container_id, error = %e, "docker logs attach failed");
                return;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stdout.map(|out| {
            let tx = tx.clone();
            tokio::spawn(forward_lines(out, LogStream::Out, tx))
        });
        let err_task = stderr.map(|err| {
            let tx = tx.clone();
            tokio::spawn(forward_lines(err, LogStream::Err, tx))
        });

        if let Some(task) = out_task {
            let _ = task.await;
        }
        if let Some(task) = err_task {
            let _ = task.await;
        }
        let _ = child.wait().await;
    });
}

/// `docker wait` blocks until the container exits and prints the exit code.
fn wait_for_exit(container_id: String, tx: oneshot::Sender<i64>) {
    tokio::spawn(async move {
        let code = match docker_cli(&["wait", &container_id]).await {
            Ok(out) => out.trim().parse().unwrap_or(-1),
            Err(e) => {
                warn!(container = %container_id, error = %e, "docker wait failed");
                -1
            }
        };
        let _ = tx.send(code);
    });
}

/// Invoke the docker CLI. Success yields trimmed stdout; failure yields a
/// `docker <verb>: ...` message with stderr already scrubbed of credentials,
/// since env values and clone URLs can surface in daemon errors.
async fn docker_cli(args: &[&str]) -> Result<String, String> {
    let verb = args.first().copied().unwrap_or("docker");
    let output = match tokio::process::Command::new("docker").args(args).output().await {
        Ok(output) => output,
        Err(e) => return Err(format!("docker {}: exec failed: {}", verb, e)),
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            output.status.to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(scrub_secrets(&format!("docker {}: {}", verb, detail)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
