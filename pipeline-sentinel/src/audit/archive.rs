//! JSONL export of audit events
//!
//! Writes one JSON event per line. Exported events keep their checksum, so a
//! file can be re-verified offline.

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::event::AuditEvent;
use crate::error::{Error, Result};

/// Export a batch of audit events to a JSONL file.
///
/// Creates `export_dir` if it doesn't exist and writes events to
/// `audit_export_YYYYMMDD_HHMMSS_ffffff.jsonl`. An empty batch produces an
/// empty file.
///
/// Returns the path to the created file.
pub async fn export_jsonl(events: &[AuditEvent], export_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(export_dir).await.map_err(|e| {
        Error::Internal(format!(
            "Failed to create export directory {}: {}",
            export_dir.display(),
            e
        ))
    })?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
    let filepath = export_dir.join(format!("audit_export_{}.jsonl", timestamp));

    let mut lines = String::new();
    for event in events {
        let line = serde_json::to_string(event).map_err(|e| {
            Error::Internal(format!("Failed to serialize audit event {}: {}", event.event_id, e))
        })?;
        lines.push_str(&line);
        lines.push('\n');
    }

    tokio::fs::write(&filepath, lines.as_bytes())
        .await
        .map_err(|e| {
            Error::Internal(format!(
                "Failed to write export file {}: {}",
                filepath.display(),
                e
            ))
        })?;

    tracing::info!(
        "Exported {} audit events to {}",
        events.len(),
        filepath.display()
    );

    Ok(filepath)
}
