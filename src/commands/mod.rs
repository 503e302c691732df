pub mod diff;
pub mod status;
pub mod sync;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ErrorCode, SyncError};
use crate::favsync::bilibili::{BilibiliClient, BilibiliSettings, load_cookie_file};
use crate::favsync::config::{self, FavsyncConfig, SourceKind};
use crate::favsync::dump::DumpSource;
use crate::favsync::paths::{FavsyncPaths, resolve_paths};
use crate::favsync::source::CollectionSource;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }

    /// Record a failure class callers can match on, plus its message.
    pub fn fail(&mut self, code: ErrorCode, text: impl Into<String>) {
        self.detail(format!("error_code={}", code.as_str()));
        self.issue(text);
    }

    pub fn fail_sync(&mut self, err: &SyncError) {
        self.fail(err.code(), err.to_string());
    }
}

/// Command-line values layered over file and environment configuration.
#[derive(Debug, Clone, Default)]
pub struct SourceOverrides {
    pub collection_id: Option<String>,
    pub dump: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub records_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Runtime {
    pub paths: FavsyncPaths,
    pub config: FavsyncConfig,
}

impl Runtime {
    pub fn load(overrides: &SourceOverrides) -> Result<Self> {
        let mut paths = resolve_paths()?;
        let mut config = config::load_config(&paths)?;

        if let Some(id) = overrides.collection_id.as_deref() {
            config.sync.collection_id = Some(id.trim().to_string());
        }
        if let Some(dump) = overrides.dump.as_ref() {
            config.source.kind = SourceKind::Dump;
            config.source.dump_path = Some(dump.clone());
        }
        if let Some(dir) = overrides.output_dir.as_ref() {
            paths.output_dir = dir.clone();
        }
        if let Some(dir) = overrides.records_dir.as_ref() {
            paths.records_dir = dir.clone();
        }
        Ok(Self { paths, config })
    }

    /// The collection to work on, or a report issue when none is configured.
    pub fn collection_id(&self, report: &mut CommandReport) -> Option<String> {
        match self.config.sync.collection_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
            _ => {
                report.fail(
                    ErrorCode::E009InvalidInput,
                    "no collection id: pass COLLECTION_ID, set sync.collection_id or FAVSYNC_COLLECTION_ID",
                );
                None
            }
        }
    }

    pub fn build_source(&self) -> Result<Box<dyn CollectionSource>> {
        let source = &self.config.source;
        match source.kind {
            SourceKind::Dump => {
                let path = source
                    .dump_path
                    .as_ref()
                    .context("source kind `dump` requires a dump file")?;
                Ok(Box::new(DumpSource::load(path)?))
            }
            SourceKind::Bilibili => {
                let cookie = source
                    .cookie_file
                    .as_deref()
                    .map(load_cookie_file)
                    .transpose()?;
                let client = BilibiliClient::new(BilibiliSettings {
                    cookie,
                    request_delay: Duration::from_millis(source.request_delay_ms),
                    request_timeout: Duration::from_secs(source.request_timeout_secs),
                })?;
                Ok(Box::new(client))
            }
        }
    }
}
