use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use kitflow_core::types::{ExecutionEvent, ExecutionEventKind};

/// JSONL audit logger.
///
/// Consumes the execution event broadcast and appends one JSON object per
/// line. The file is flushed after every entry, so a crash loses at most
/// the entry being written.
pub struct AuditLogger {
    log_dir: PathBuf,
    include_snapshots: bool,
}

/// A single audit line.
#[derive(Debug, Serialize)]
struct AuditEntry {
    timestamp: String,
    session_id: String,
    workflow_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl AuditLogger {
    /// Entries are written to `{log_dir}/audit_{timestamp}.jsonl`.
    /// Without snapshots, stage events keep only their stage label.
    pub fn new(log_dir: PathBuf, include_snapshots: bool) -> Self {
        Self {
            log_dir,
            include_snapshots,
        }
    }

    /// Run the logger until cancellation or until the bus closes.
    ///
    /// Takes an already-subscribed receiver so no event published after the
    /// caller subscribed is missed.
    pub async fn run(self, mut rx: broadcast::Receiver<ExecutionEvent>, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create audit directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = self.log_dir.join(format!("audit_{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open audit file");
                return;
            }
        };

        info!(path = %log_path.display(), "AuditLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                biased;
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let entry = self.event_to_entry(&event);
                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write audit entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush audit file");
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "AuditLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, AuditLogger stopping");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("AuditLogger cancelled");
                    break;
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "AuditLogger finished");
    }

    fn event_to_entry(&self, event: &ExecutionEvent) -> AuditEntry {
        let detail = match event.kind {
            ExecutionEventKind::StageCompleted if !self.include_snapshots => None,
            _ => event.data.clone(),
        };
        AuditEntry {
            timestamp: event.timestamp.to_rfc3339(),
            session_id: event.session_id.to_string(),
            workflow_id: event.workflow_id.clone(),
            event_type: event.kind.as_str(),
            stage: event.stage.map(|s| s.to_string()),
            detail,
        }
    }
}
