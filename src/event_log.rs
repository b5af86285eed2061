//! Persistent build event log
//!
//! Appends every [`BuildEvent`] as a JSON line to `.beaver/events.jsonl` in
//! the build root, tagged with a per-invocation build id. Off unless
//! `general.event_log` is set.

use crate::scheduler::BuildEvent;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Event log location relative to the build root
pub const EVENT_LOG_PATH: &str = ".beaver/events.jsonl";

/// File-based build event logger that appends JSON lines
pub struct EventLog {
    enabled: bool,
    path: PathBuf,
    build_id: Uuid,
}

impl EventLog {
    /// Create an event logger for the build rooted at `root`
    pub fn new(root: &Path, enabled: bool) -> Self {
        Self {
            enabled,
            path: root.join(EVENT_LOG_PATH),
            build_id: Uuid::new_v4(),
        }
    }

    /// Identifier shared by every line this logger writes
    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append one event
    ///
    /// IO failures are logged and dropped; they never fail the build.
    pub async fn log(&self, event: &BuildEvent) {
        if !self.enabled {
            return;
        }

        let mut entry = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize build event: {}", e);
                return;
            }
        };
        if let Some(fields) = entry.as_object_mut() {
            fields.insert(
                "timestamp".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
            fields.insert(
                "build_id".to_string(),
                serde_json::Value::String(self.build_id.to_string()),
            );
        }

        let mut line = entry.to_string();
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write event log {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
