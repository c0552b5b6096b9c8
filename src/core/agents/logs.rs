//! Per-agent log pipeline: raw sandbox chunks become timestamped lines in a
//! bounded in-memory ring, flushed to the store in batch transactions.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::core::error::EngineResult;
use crate::core::sandbox::LogChunk;
use crate::core::store::Store;
use crate::core::store::types::NewLogLine;

pub struct LogSink {
    store: Store,
    capacity: usize,
    pending: Mutex<HashMap<String, Vec<NewLogLine>>>,
}

impl LogSink {
    pub fn new(store: Store, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one raw chunk: split on newlines, drop empty lines, stamp each
    /// with the wall clock. Reaching the ring capacity flushes that agent.
    pub async fn push_chunk(&self, agent_id: &str, chunk: LogChunk) {
        let mut flush_now = false;
        {
            let mut pending = self.pending.lock().await;
            let ring = pending.entry(agent_id.to_string()).or_default();
            for line in chunk.data.split('\n') {
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    continue;
                }
                ring.push(NewLogLine {
                    agent_id: agent_id.to_string(),
                    timestamp: Utc::now(),
                    stream: chunk.stream,
                    content: line.to_string(),
                });
            }
            if ring.len() >= self.capacity {
                flush_now = true;
            }
        }
        if flush_now && let Err(e) = self.flush_agent(agent_id).await {
            warn!(agent_id, error = %e, "log flush failed; lines retained");
        }
    }

    /// Flush one agent's ring in a single batch transaction. On store failure
    /// the lines go back to the front of the ring for the next trigger.
    pub async fn flush_agent(&self, agent_id: &str) -> EngineResult<()> {
        let lines = {
            let mut pending = self.pending.lock().await;
            match pending.get_mut(agent_id) {
                Some(ring) if !ring.is_empty() => std::mem::take(ring),
                _ => return Ok(()),
            }
        };
        if let Err(e) = self.store.append_log_lines(lines.clone()).await {
            let mut pending = self.pending.lock().await;
            let ring = pending.entry(agent_id.to_string()).or_default();
            let tail = std::mem::take(ring);
            *ring = lines;
            ring.extend(tail);
            return Err(e);
        }
        Ok(())
    }

    /// Periodic-tick flush: one batch transaction covering every agent with
    /// pending lines.
    pub async fn flush_all(&self) -> EngineResult<()> {
        let batch: Vec<NewLogLine> = {
            let mut pending = self.pending.lock().await;
            let mut batch = Vec::new();
            for (_, ring) in pending.iter_mut() {
                batch.append(ring);
            }
            batch
        };
        if batch.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.store.append_log_lines(batch.clone()).await {
            let mut pending = self.pending.lock().await;
            for line in batch {
                let ring = pending.entry(line.agent_id.clone()).or_default();
                ring.push(line);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Drop the ring once an agent is finalized and its last flush is done.
    pub async fn forget(&self, agent_id: &str) {
        self.pending.lock().await.remove(agent_id);
    }

    #[cfg(test)]
    pub async fn pending_len(&self, agent_id: &str) -> usize {
        self.pending
            .lock()
            .await
            .get(agent_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
