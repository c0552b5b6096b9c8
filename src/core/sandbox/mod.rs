pub mod docker;
pub mod host;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::core::error::EngineResult;
use crate::core::store::types::LogStream;

pub use docker::DockerCliDriver;
pub use host::HostProcessDriver;

/// Everything a driver needs to start one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Stable name, equal to the agent id.
    pub name: String,
    pub image: String,
    /// Bind-mounted read-write at `/workspace` (containers) or used as the
    /// working directory (host processes).
    pub workspace: PathBuf,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub memory_limit_mb: u64,
    pub cpus: f64,
}

/// A chunk of raw output from a sandbox; may contain several newline-separated
/// lines or a partial line.
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub stream: LogStream,
    pub data: String,
}

/// State reported by `inspect` for a previously-launched sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxState {
    Running,
    Exited(i64),
    /// The driver has no record of the handle.
    Gone,
}

/// A launched sandbox: the durable handle (container id or host pid) plus the
/// live output stream and exit notification.
pub struct RunningSandbox {
    pub handle: String,
    pub logs: mpsc::Receiver<LogChunk>,
    pub exit: oneshot::Receiver<i64>,
}

/// Forward one sandbox output pipe line by line into the chunk channel,
/// until EOF or the receiver hangs up. Shared by both drivers.
pub(crate) async fn forward_lines(
    reader: impl tokio::io::AsyncRead + Unpin,
    stream: LogStream,
    tx: mpsc::Sender<LogChunk>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let chunk = LogChunk {
            stream,
            data: format!("{}\n", line),
        };
        if tx.send(chunk).await.is_err() {
            break;
        }
    }
}

/// The isolation primitive behind the lifecycle manager. Implemented by the
/// docker CLI driver for containerized kinds and by the host-process driver
/// for deployer/healthcheck; tests substitute an in-memory fake.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// True when `image` can be run without pulling.
    async fn image_available(&self, image: &str) -> EngineResult<bool>;

    async fn launch(&self, spec: SandboxSpec) -> EngineResult<RunningSandbox>;

    /// Best-effort state of a sandbox identified by a persisted handle; used
    /// by the startup recovery sweep.
    async fn inspect(&self, handle: &str) -> EngineResult<SandboxState>;

    async fn kill(&self, handle: &str) -> EngineResult<()>;

    /// Remove any remains (container, bookkeeping). Must tolerate handles
    /// that are already gone.
    async fn remove(&self, handle: &str) -> EngineResult<()>;
}
