use anyhow::Result;

use crate::commands::{CommandReport, Runtime, SourceOverrides};
use crate::error::ErrorCode;
use crate::favsync::artifact::ArtifactWriter;
use crate::favsync::config;
use crate::favsync::orchestrator::Orchestrator;
use crate::favsync::records::RecordStore;

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub overrides: SourceOverrides,
}

pub fn run(opts: &DiffOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("diff");
    let runtime = Runtime::load(&opts.overrides)?;
    if let Err(err) = config::validate(&runtime.config) {
        report.fail(ErrorCode::E009InvalidInput, err.to_string());
        return Ok(report);
    }
    let Some(collection_id) = runtime.collection_id(&mut report) else {
        return Ok(report);
    };
    report.detail(format!("collection={collection_id}"));

    let source = runtime.build_source()?;
    let records = RecordStore::new(&runtime.paths.records_dir);
    // Never written to: preview stops after DIFF.
    let writer = ArtifactWriter::new(
        &runtime.paths.output_dir,
        runtime.config.sync.max_filename_chars,
        runtime.config.timezone()?,
    );

    let preview = match Orchestrator::new(source.as_ref(), &records, &writer).preview(&collection_id)
    {
        Ok(preview) => preview,
        Err(err) => {
            report.fail_sync(&err);
            return Ok(report);
        }
    };

    report.detail(format!("history={}", preview.history.label()));
    report.detail(format!("current={}", preview.delta.current_total));
    report.detail(format!("already_synced={}", preview.delta.already_synced));
    report.detail(format!("gone_remote={}", preview.delta.gone_remote));
    report.detail(format!("pending={}", preview.delta.pending.len()));
    for identifier in &preview.delta.pending {
        report.detail(format!("pending_item={identifier}"));
    }
    Ok(report)
}
