//! Host-process sandbox driver for kinds that run directly on the engine
//! host (deployer, healthcheck). No image, no container; the handle is the
//! child pid.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::{RunningSandbox, SandboxDriver, SandboxSpec, SandboxState, forward_lines};
use crate::core::error::{EngineError, EngineResult};
use crate::core::store::types::LogStream;

#[derive(Clone, Default)]
pub struct HostProcessDriver;

impl HostProcessDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SandboxDriver for HostProcessDriver {
    async fn image_available(&self, _image: &str) -> EngineResult<bool> {
        Ok(true)
    }

    async fn launch(&self, spec: SandboxSpec) -> EngineResult<RunningSandbox> {
        let program = spec
            .command
            .first()
            .ok_or_else(|| EngineError::Sandbox("host spawn: empty command".into()))?;

        let mut child = tokio::process::Command::new(program)
            .args(&spec.command[1..])
            .current_dir(&spec.workspace)
            .envs(spec.env.iter().cloned())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Sandbox(format!("host spawn {}: {}", program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| EngineError::Sandbox("host spawn: child exited immediately".into()))?;

        let (log_tx, log_rx) = mpsc::channel(256);
        let (exit_tx, exit_rx) = oneshot::channel();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::spawn(async move {
            let out_task = stdout.map(|out| {
                let tx = log_tx.clone();
                tokio::spawn(forward_lines(out, LogStream::Out, tx))
            });
            let err_task = stderr.map(|err| {
                let tx = log_tx.clone();
                tokio::spawn(forward_lines(err, LogStream::Err, tx))
            });
            if let Some(task) = out_task {
                let _ = task.await;
            }
            if let Some(task) = err_task {
                let _ = task.await;
            }
            let code = match child.wait().await {
                Ok(status) => status.code().map(i64::from).unwrap_or(-1),
                Err(e) => {
                    warn!(pid, error = %e, "host process wait failed");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(RunningSandbox {
            handle: pid.to_string(),
            logs: log_rx,
            exit: exit_rx,
        })
    }

    /// A host pid cannot be reconciled to an exit code after a restart; the
    /// recovery sweep only needs to know whether it is still alive.
    async fn inspect(&self, handle: &str) -> EngineResult<SandboxState> {
        let alive = tokio::process::Command::new("kill")
            .args(["-0", handle])
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false);
        Ok(if alive {
            SandboxState::Running
        } else {
            SandboxState::Gone
        })
    }

    async fn kill(&self, handle: &str) -> EngineResult<()> {
        let out = tokio::process::Command::new("kill")
            .args(["-TERM", handle])
            .output()
            .await
            .map_err(|e| EngineError::Sandbox(format!("kill {}: {}", handle, e)))?;
        if out.status.success() {
            Ok(())
        } else {
            Err(EngineError::Sandbox(format!(
                "kill {}: {}",
                handle,
                String::from_utf8_lossy(&out.stderr).trim()
            )))
        }
    }

    async fn remove(&self, _handle: &str) -> EngineResult<()> {
        Ok(())
    }
}
