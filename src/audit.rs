//! Audit logging for build job lifecycle events
//!
//! Writes JSON lines to `~/.local/state/buildsrv/audit.log` (or
//! `general.audit_path`): one line per job created, finished, failed or
//! evicted.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// File-based audit logger that appends JSON lines
#[derive(Debug)]
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
    // Serializes appends so concurrent events never interleave
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        let path = config
            .general
            .audit_path
            .clone()
            .unwrap_or_else(ConfigManager::audit_log_path);
        Self::with_path(path, config.general.audit_log)
    }

    /// Create an audit logger writing to `path`
    pub fn with_path(path: PathBuf, enabled: bool) -> Self {
        Self {
            enabled,
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// An audit logger that records nothing
    pub fn disabled() -> Self {
        Self::with_path(PathBuf::new(), false)
    }

    /// Log an audit event as a JSON line
    ///
    /// Silently drops events on IO failure; audit logging never fails a
    /// request.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;

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
