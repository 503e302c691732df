use anyhow::Result;

use crate::commands::{CommandReport, Runtime, SourceOverrides};
use crate::favsync::config::{self, active_env_overrides, resolve_config_path};
use crate::favsync::records::RecordStore;

#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    pub overrides: SourceOverrides,
}

fn history_report(records: &RecordStore, collection_id: &str) -> CommandReport {
    let mut report = CommandReport::new("history");
    let entries = match records.list(collection_id) {
        Ok(entries) => entries,
        Err(err) => {
            report.issue(format!("cannot list snapshots: {err:#}"));
            return report;
        }
    };
    report.detail(format!("snapshots={}", entries.len()));
    let Some(latest) = entries.last() else {
        return report;
    };
    report.detail(format!("latest_snapshot={}", latest.path.display()));
    match RecordStore::read(&latest.path) {
        Ok(snapshot) => {
            report.detail(format!("latest_collection={}", snapshot.collection_id()));
            report.detail(format!("latest_sync_time={}", snapshot.sync_time()));
            report.detail(format!("latest_count={}", snapshot.total_count()));
        }
        Err(err) => report.issue(format!(
            "latest snapshot unreadable, next sync starts from scratch: {err:#}"
        )),
    }
    report
}

pub fn run(opts: &StatusOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let runtime = Runtime::load(&opts.overrides)?;
    let paths = &runtime.paths;

    let config_path = resolve_config_path(paths);
    report.detail(format!("favsync_home={}", paths.favsync_home.display()));
    report.detail(format!(
        "config_file={} exists={}",
        config_path.display(),
        config_path.is_file()
    ));
    report.detail(format!("output_dir={}", paths.output_dir.display()));
    report.detail(format!("records_dir={}", paths.records_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("source={}", runtime.config.source.kind.as_str()));
    report.detail(format!("record_policy={}", runtime.config.sync.record_policy));
    report.detail(format!("timezone={}", runtime.config.sync.timezone));
    report.detail(format!("rewrite_enabled={}", runtime.config.rewrite.enabled));
    report.detail(format!(
        "rewrite_api_key_set={}",
        runtime.config.rewrite.api_key.is_some()
    ));
    if let Err(err) = config::validate(&runtime.config) {
        report.issue(format!("invalid configuration: {err}"));
    }

    let overrides = active_env_overrides();
    report.detail(format!(
        "env_overrides={}",
        if overrides.is_empty() {
            "none".to_string()
        } else {
            overrides.join(",")
        }
    ));

    match runtime.config.sync.collection_id.as_deref() {
        Some(id) if !id.trim().is_empty() => {
            report.detail(format!("collection={}", id.trim()));
            let records = RecordStore::new(&paths.records_dir);
            report.merge(history_report(&records, id.trim()));
        }
        _ => report.detail("collection=unset"),
    }

    report.detail(format!("build_id={}", env!("BUILD_UUID")));
    Ok(report)
}
