use crate::favsync::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub collection: String,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(
    logs_dir: &Path,
    collection: &str,
    phase: &str,
    status: &str,
    message: &str,
) -> Result<()> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        collection: collection.to_string(),
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = logs_dir.join("audit.log");
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn events_append_as_json_lines() {
        let tmp = tempdir().expect("tempdir");
        let logs = tmp.path().join("logs");
        append_event(&logs, "42", "LOAD_HISTORY", "ok", "missing").expect("first");
        append_event(&logs, "42", "DONE", "ok", "written=1").expect("second");

        let raw = fs::read_to_string(logs.join("audit.log")).expect("read");
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let last: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(last["collection"], "42");
        assert_eq!(last["phase"], "DONE");
        assert_eq!(last["message"], "written=1");
    }
}
