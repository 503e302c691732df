use anyhow::Result;

use crate::commands::{CommandReport, Runtime, SourceOverrides};
use crate::error::{ErrorCode, SyncError};
use crate::favsync::artifact::ArtifactWriter;
use crate::favsync::config::{self, RecordPolicy};
use crate::favsync::lock::CollectionLock;
use crate::favsync::orchestrator::{Orchestrator, SnapshotStatus, SyncOutcome, SyncSettings};
use crate::favsync::records::{HistoryStatus, RecordStore};
use crate::favsync::rewrite::{ChatCompletionsRewriter, ChatRewriterSettings, PromptTemplates};
use crate::favsync::source::Rewriter;
use crate::favsync::util::truncate_with_ellipsis;

const MAX_REASON_CHARS: usize = 160;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub overrides: SourceOverrides,
    pub rewrite: Option<bool>,
    pub record_policy: Option<String>,
}

fn build_rewriter(runtime: &Runtime) -> Result<Option<ChatCompletionsRewriter>> {
    let cfg = &runtime.config.rewrite;
    if !cfg.enabled {
        return Ok(None);
    }
    let Some(api_key) = cfg.api_key.clone() else {
        return Ok(None);
    };
    let prompts = match cfg.prompt_file.as_deref() {
        Some(path) => PromptTemplates::load(path)?,
        None => PromptTemplates::default(),
    };
    let rewriter = ChatCompletionsRewriter::new(ChatRewriterSettings {
        api_key,
        base_url: cfg.base_url.clone(),
        model: cfg.model.clone(),
        temperature: cfg.temperature,
        timeout_secs: cfg.timeout_secs,
        prompts,
    })?;
    Ok(Some(rewriter))
}

fn history_detail(status: &HistoryStatus) -> String {
    match status {
        HistoryStatus::Missing => "history=missing".to_string(),
        HistoryStatus::Loaded { path } => format!("history=loaded path={}", path.display()),
        HistoryStatus::Unusable { reason, .. } => format!(
            "history=unusable reason={}",
            truncate_with_ellipsis(reason, MAX_REASON_CHARS)
        ),
    }
}

fn describe_outcome(report: &mut CommandReport, outcome: &SyncOutcome) {
    report.detail(history_detail(&outcome.history));
    report.detail(format!("current={}", outcome.delta.current_total));
    report.detail(format!("already_synced={}", outcome.delta.already_synced));
    report.detail(format!("gone_remote={}", outcome.delta.gone_remote));
    report.detail(format!("attempted={}", outcome.attempted()));
    report.detail(format!("fetched={}", outcome.fetched));
    report.detail(format!("written={}", outcome.written.len()));
    report.detail(format!("failed={}", outcome.failures.len()));
    report.detail(format!("rewrite_failures={}", outcome.rewrite_failures));

    for artifact in &outcome.written {
        report.detail(format!(
            "artifact={} transcript={} lang={} path={}",
            artifact.identifier,
            artifact.transcript.as_str(),
            artifact.language.as_deref().unwrap_or("none"),
            artifact.path.display()
        ));
    }
    for failure in &outcome.failures {
        report.detail(format!(
            "skipped={} phase={} reason={}",
            failure.identifier,
            failure.phase.as_str(),
            truncate_with_ellipsis(&failure.reason, MAX_REASON_CHARS)
        ));
    }

    report.detail(format!("snapshot={}", outcome.snapshot.label()));
    match &outcome.snapshot {
        SnapshotStatus::Appended { path, recorded } => {
            report.detail(format!("snapshot_path={}", path.display()));
            report.detail(format!("recorded={recorded}"));
        }
        SnapshotStatus::Failed { reason } => report.fail(
            ErrorCode::E005HistoryWriteFailed,
            format!("snapshot append failed, next diff will use stale history: {reason}"),
        ),
        SnapshotStatus::Skipped => {}
    }
    if !outcome.delta.is_empty() && outcome.written.is_empty() {
        report.fail(
            ErrorCode::E006ArtifactWriteFailed,
            format!("{} pending items but no artifact was written", outcome.attempted()),
        );
    }
    report.detail(format!("terminal={}", outcome.terminal.as_str()));
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("sync");
    let mut runtime = Runtime::load(&opts.overrides)?;

    if let Some(enabled) = opts.rewrite {
        runtime.config.rewrite.enabled = enabled;
    }
    if let Some(policy) = opts.record_policy.as_deref() {
        match policy.parse::<RecordPolicy>() {
            Ok(policy) => runtime.config.sync.record_policy = policy,
            Err(err) => {
                report.fail(ErrorCode::E009InvalidInput, err.to_string());
                return Ok(report);
            }
        }
    }
    if let Err(err) = config::validate(&runtime.config) {
        report.fail(ErrorCode::E009InvalidInput, err.to_string());
        return Ok(report);
    }
    let Some(collection_id) = runtime.collection_id(&mut report) else {
        return Ok(report);
    };

    report.detail(format!("collection={collection_id}"));
    report.detail(format!("source={}", runtime.config.source.kind.as_str()));
    report.detail(format!(
        "record_policy={}",
        runtime.config.sync.record_policy
    ));
    report.detail(format!("output_dir={}", runtime.paths.output_dir.display()));
    report.detail(format!("records_dir={}", runtime.paths.records_dir.display()));

    let lock = match CollectionLock::acquire(&runtime.paths.records_dir, &collection_id) {
        Ok(lock) => lock,
        Err(err) => match err.downcast_ref::<SyncError>() {
            Some(sync_err) => {
                report.fail_sync(sync_err);
                return Ok(report);
            }
            None => return Err(err),
        },
    };

    report.detail(format!("lock={}", lock.path().display()));

    let source = runtime.build_source()?;
    let rewriter = build_rewriter(&runtime)?;
    report.detail(format!("rewrite={}", rewriter.is_some()));

    let records = RecordStore::new(&runtime.paths.records_dir);
    let writer = ArtifactWriter::new(
        &runtime.paths.output_dir,
        runtime.config.sync.max_filename_chars,
        runtime.config.timezone()?,
    );
    let mut orchestrator = Orchestrator::new(source.as_ref(), &records, &writer)
        .with_audit_log(&runtime.paths.logs_dir);
    if let Some(rewriter) = rewriter.as_ref() {
        orchestrator = orchestrator.with_rewriter(rewriter as &dyn Rewriter);
    }

    let settings = SyncSettings {
        collection_id,
        record_policy: runtime.config.sync.record_policy,
        rewrite_limits: runtime.config.rewrite.limits(),
    };
    match orchestrator.run(&settings) {
        Ok(outcome) => describe_outcome(&mut report, &outcome),
        Err(err) => report.fail_sync(&err),
    }
    drop(lock);
    Ok(report)
}
