pub mod event;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub use event::{Event, EventPayload};

use crate::core::error::{EngineError, EngineResult};

/// Durable FIFO event log: one JSON file per event, `pending/` until handled,
/// renamed into `processed/` afterwards. Filenames sort chronologically, and
/// the rename is the atomicity and deduplication primitive — a file is in
/// exactly one of the two directories at all times.
#[derive(Clone)]
pub struct EventSpool {
    pending: PathBuf,
    processed: PathBuf,
}

impl EventSpool {
    pub fn open<P: AsRef<Path>>(base: P) -> EngineResult<Self> {
        let pending = base.as_ref().join("pending");
        let processed = base.as_ref().join("processed");
        std::fs::create_dir_all(&pending)
            .and_then(|_| std::fs::create_dir_all(&processed))
            .map_err(|e| EngineError::Spool(format!("create spool dirs: {}", e)))?;
        Ok(Self { pending, processed })
    }

    /// Append a new event to `pending/`. The file is fsynced before this
    /// returns, so an acknowledged event survives a crash.
    pub async fn append(&self, payload: EventPayload, source: &str) -> EngineResult<Event> {
        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: source.to_string(),
            payload,
        };
        let name = file_name(&event.timestamp, event.payload.kind(), &event.id);
        let path = self.pending.join(&name);
        let body = serde_json::to_vec_pretty(&event)
            .map_err(|e| EngineError::Spool(format!("encode event: {}", e)))?;

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| EngineError::Spool(format!("create {}: {}", name, e)))?;
        file.write_all(&body)
            .await
            .map_err(|e| EngineError::Spool(format!("write {}: {}", name, e)))?;
        file.sync_all()
            .await
            .map_err(|e| EngineError::Spool(format!("fsync {}: {}", name, e)))?;

        debug!(kind = event.payload.kind(), id = %event.id, "event appended");
        Ok(event)
    }

    pub async fn list_pending(&self) -> EngineResult<Vec<Event>> {
        self.read_dir_sorted(&self.pending, None).await
    }

    pub async fn list_processed(&self, limit: Option<usize>) -> EngineResult<Vec<Event>> {
        self.read_dir_sorted(&self.processed, limit).await
    }

    /// All events, pending first then processed, each in filename order.
    pub async fn list_all(&self, limit: usize) -> EngineResult<Vec<Event>> {
        let mut events = self.list_pending().await?;
        events.extend(self.list_processed(None).await?);
        events.truncate(limit);
        Ok(events)
    }

    /// Move the event with the given id (full UUID or unique prefix of at
    /// least the filename's 8-char short id) from `pending/` to `processed/`.
    /// A second call for the same id fails with not-found; racing observers
    /// are deduplicated by the rename itself.
    pub async fn mark_processed(&self, id: &str) -> EngineResult<Event> {
        let name = self.find_pending_name(id).await?;
        let from = self.pending.join(&name);
        let to = self.processed.join(&name);
        let event = read_event(&from).await?;
        tokio::fs::rename(&from, &to).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(format!("event {}", id))
            } else {
                EngineError::Spool(format!("rename {}: {}", name, e))
            }
        })?;
        Ok(event)
    }

    /// Look up an event by id in either directory. Ambiguous prefixes are
    /// rejected rather than resolved arbitrarily.
    pub async fn get(&self, id: &str) -> EngineResult<Event> {
        for dir in [&self.pending, &self.processed] {
            let mut matches = match_names(dir, id).await?;
            match matches.len() {
                0 => continue,
                1 => return read_event(&dir.join(matches.remove(0))).await,
                _ => {
                    return Err(EngineError::Validation(format!(
                        "ambiguous event id prefix {}",
                        id
                    )));
                }
            }
        }
        Err(EngineError::NotFound(format!("event {}", id)))
    }

    async fn find_pending_name(&self, id: &str) -> EngineResult<String> {
        let mut matches = match_names(&self.pending, id).await?;
        match matches.len() {
            0 => Err(EngineError::NotFound(format!("event {}", id))),
            1 => Ok(matches.remove(0)),
            _ => Err(EngineError::Validation(format!(
                "ambiguous event id prefix {}",
                id
            ))),
        }
    }

    async fn read_dir_sorted(
        &self,
        dir: &Path,
        limit: Option<usize>,
    ) -> EngineResult<Vec<Event>> {
        let names = list_names(dir).await?;
        let mut events = Vec::with_capacity(names.len());
        for name in names {
            match read_event(&dir.join(&name)).await {
                Ok(event) => events.push(event),
                // A concurrent rename can remove a file between listing and
                // reading; skip it.
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
            if let Some(limit) = limit
                && events.len() >= limit
            {
                break;
            }
        }
        Ok(events)
    }
}

/// `<ISO-8601 with ':'/'.' as '-'>-<kind with dots as dashes>-<id8>.json`
fn file_name(timestamp: &DateTime<Utc>, kind: &str, id: &str) -> String {
    let ts = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    // Kinds come from callers too; anything outside [a-zA-Z0-9] becomes a
    // dash so the name stays a single path component.
    let kind: String = kind
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let short: String = id.chars().take(8).collect();
    format!("{}-{}-{}.json", ts, kind, short)
}

/// The 8-char short id embedded in a spool filename.
fn short_id(name: &str) -> Option<&str> {
    name.strip_suffix(".json")
        .and_then(|stem| stem.rsplit('-').next())
}

async fn list_names(dir: &Path) -> EngineResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| EngineError::Spool(format!("read {}: {}", dir.display(), e)))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::Spool(e.to_string()))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".json") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

async fn match_names(dir: &Path, id: &str) -> EngineResult<Vec<String>> {
    let prefix: String = id.chars().take(8).collect();
    if prefix.is_empty() {
        return Err(EngineError::Validation("empty event id".into()));
    }
    Ok(list_names(dir)
        .await?
        .into_iter()
        .filter(|name| short_id(name).is_some_and(|s| s.starts_with(&prefix) || prefix.starts_with(s)))
        .collect())
}

async fn read_event(path: &Path) -> EngineResult<Event> {
    let raw = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotFound(format!("event file {}", path.display()))
        } else {
            EngineError::Spool(format!("read {}: {}", path.display(), e))
        }
    })?;
    serde_json::from_slice(&raw)
        .map_err(|e| EngineError::Spool(format!("decode {}: {}", path.display(), e)))
}
