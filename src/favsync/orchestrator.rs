use crate::error::{ErrorCode, SyncError};
use crate::favsync::artifact::ArtifactWriter;
use crate::favsync::audit;
use crate::favsync::config::RecordPolicy;
use crate::favsync::diff::{Delta, compute_delta};
use crate::favsync::model::ItemMetadata;
use crate::favsync::records::{HistoryLoad, HistoryStatus, RecordStore};
use crate::favsync::rewrite::RewriteLimits;
use crate::favsync::source::{CollectionSource, Rewriter};
use crate::favsync::transcript::{TranscriptOrigin, choose_transcript};
use crate::favsync::util::truncate_with_ellipsis;
use crate::favsync::warn::{self, WarnEvent};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::PathBuf;

const MAX_WARN_ERR_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    LoadHistory,
    Diff,
    EmptyDelta,
    FetchDetails,
    WriteArtifacts,
    AppendSnapshot,
    Done,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadHistory => "LOAD_HISTORY",
            Self::Diff => "DIFF",
            Self::EmptyDelta => "EMPTY_DELTA",
            Self::FetchDetails => "FETCH_DETAILS",
            Self::WriteArtifacts => "WRITE_ARTIFACTS",
            Self::AppendSnapshot => "APPEND_SNAPSHOT",
            Self::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub collection_id: String,
    pub record_policy: RecordPolicy,
    pub rewrite_limits: RewriteLimits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub identifier: String,
    pub phase: SyncPhase,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub identifier: String,
    pub path: PathBuf,
    pub transcript: TranscriptOrigin,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    Appended { path: PathBuf, recorded: usize },
    /// Next run's diff works from stale history until an append succeeds.
    Failed { reason: String },
    /// Empty delta: history already matches the manifest.
    Skipped,
}

impl SnapshotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Appended { .. } => "appended",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Result of one completed run. Built once at the end of the run.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub collection_id: String,
    pub terminal: SyncPhase,
    pub history: HistoryStatus,
    pub delta: Delta,
    pub fetched: usize,
    pub written: Vec<WrittenArtifact>,
    pub failures: Vec<ItemFailure>,
    pub rewrite_failures: usize,
    pub snapshot: SnapshotStatus,
}

impl SyncOutcome {
    pub fn attempted(&self) -> usize {
        self.delta.pending.len()
    }

    /// False when history could not be updated or a non-empty delta
    /// produced no artifact at all.
    pub fn is_clean(&self) -> bool {
        let snapshot_ok = !matches!(self.snapshot, SnapshotStatus::Failed { .. });
        snapshot_ok && (self.delta.is_empty() || !self.written.is_empty())
    }
}

/// Outcome of LOAD_HISTORY and DIFF alone.
#[derive(Debug, Clone)]
pub struct DiffPreview {
    pub history: HistoryStatus,
    pub delta: Delta,
}

/// Runs LOAD_HISTORY → DIFF → FETCH_DETAILS → WRITE_ARTIFACTS → APPEND_SNAPSHOT
/// for one collection. The caller guarantees a single writer per collection.
pub struct Orchestrator<'a> {
    source: &'a dyn CollectionSource,
    rewriter: Option<&'a dyn Rewriter>,
    records: &'a RecordStore,
    writer: &'a ArtifactWriter,
    logs_dir: Option<PathBuf>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        source: &'a dyn CollectionSource,
        records: &'a RecordStore,
        writer: &'a ArtifactWriter,
    ) -> Self {
        Self {
            source,
            rewriter: None,
            records,
            writer,
            logs_dir: None,
        }
    }

    pub fn with_rewriter(mut self, rewriter: &'a dyn Rewriter) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_audit_log(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(logs_dir.into());
        self
    }

    fn check_collection_id(collection_id: &str) -> Result<(), SyncError> {
        if collection_id.trim().is_empty() || collection_id.chars().any(char::is_control) {
            return Err(SyncError::InvalidCollectionId(collection_id.to_string()));
        }
        Ok(())
    }

    fn audit(&self, collection: &str, phase: SyncPhase, status: &str, message: &str) {
        if let Some(dir) = self.logs_dir.as_deref() {
            let _ = audit::append_event(dir, collection, phase.as_str(), status, message);
        }
    }

    fn fetch_manifest(&self, collection_id: &str) -> Result<Vec<String>, SyncError> {
        let manifest = self.source.fetch_manifest(collection_id).map_err(|err| {
            SyncError::ManifestUnavailable {
                collection: collection_id.to_string(),
                reason: format!("{err:#}"),
            }
        })?;
        if manifest.is_empty() {
            return Err(SyncError::ManifestUnavailable {
                collection: collection_id.to_string(),
                reason: "manifest lists no items".to_string(),
            });
        }
        Ok(manifest)
    }

    fn load_history(&self, collection_id: &str) -> HistoryLoad {
        let load = self.records.load_latest(collection_id);
        if let HistoryStatus::Unusable { path, reason } = &load.status {
            let shown = path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            warn::emit(
                ErrorCode::E004HistoryCorrupt,
                WarnEvent {
                    stage: SyncPhase::LoadHistory.as_str(),
                    action: "treat-as-first-sync",
                    collection: collection_id,
                    path: &shown,
                    reason: "latest snapshot unusable",
                    err: &truncate_with_ellipsis(reason, MAX_WARN_ERR_CHARS),
                    ..WarnEvent::default()
                },
            );
        }
        self.audit(
            collection_id,
            SyncPhase::LoadHistory,
            load.status.label(),
            &format!("synced={}", load.synced.len()),
        );
        load
    }

    /// Compute what a run would process without touching any output.
    pub fn preview(&self, collection_id: &str) -> Result<DiffPreview, SyncError> {
        Self::check_collection_id(collection_id)?;
        let history = self.load_history(collection_id);
        let manifest = self.fetch_manifest(collection_id)?;
        let delta = compute_delta(&manifest, &history.synced);
        Ok(DiffPreview {
            history: history.status,
            delta,
        })
    }

    pub fn run(&self, settings: &SyncSettings) -> Result<SyncOutcome, SyncError> {
        let collection = settings.collection_id.as_str();
        Self::check_collection_id(collection)?;

        let history = self.load_history(collection);
        let manifest = match self.fetch_manifest(collection) {
            Ok(manifest) => manifest,
            Err(err) => {
                self.audit(collection, SyncPhase::Diff, "failed", &err.to_string());
                return Err(err);
            }
        };
        let delta = compute_delta(&manifest, &history.synced);
        self.audit(
            collection,
            SyncPhase::Diff,
            "ok",
            &format!(
                "current={} pending={} gone_remote={}",
                delta.current_total,
                delta.pending.len(),
                delta.gone_remote
            ),
        );

        if delta.is_empty() {
            self.audit(collection, SyncPhase::EmptyDelta, "ok", "nothing to sync");
            return Ok(SyncOutcome {
                collection_id: collection.to_string(),
                terminal: SyncPhase::EmptyDelta,
                history: history.status,
                delta,
                fetched: 0,
                written: Vec::new(),
                failures: Vec::new(),
                rewrite_failures: 0,
                snapshot: SnapshotStatus::Skipped,
            });
        }

        let mut failures = Vec::new();
        let items = self.fetch_details(collection, &delta.pending, &mut failures);
        if items.is_empty() {
            self.audit(
                collection,
                SyncPhase::FetchDetails,
                "failed",
                "no pending item resolved",
            );
            return Err(SyncError::NoResolvableItems {
                collection: collection.to_string(),
                pending: delta.pending.len(),
            });
        }
        let fetched = items.len();

        let (written, rewrite_failures) =
            self.write_artifacts(collection, &items, settings.rewrite_limits, &mut failures);

        let recorded = match settings.record_policy {
            RecordPolicy::FullManifest => manifest.into_iter().collect::<BTreeSet<_>>(),
            RecordPolicy::WrittenOnly => manifest
                .into_iter()
                .filter(|id| history.synced.contains(id))
                .chain(written.iter().map(|w| w.identifier.clone()))
                .collect::<BTreeSet<_>>(),
        };
        let snapshot = self.append_snapshot(collection, recorded);

        self.audit(
            collection,
            SyncPhase::Done,
            if matches!(snapshot, SnapshotStatus::Failed { .. }) {
                "partial"
            } else {
                "ok"
            },
            &format!(
                "attempted={} fetched={} written={} failed={}",
                delta.pending.len(),
                fetched,
                written.len(),
                failures.len()
            ),
        );

        Ok(SyncOutcome {
            collection_id: collection.to_string(),
            terminal: SyncPhase::Done,
            history: history.status,
            delta,
            fetched,
            written,
            failures,
            rewrite_failures,
            snapshot,
        })
    }

    fn fetch_details(
        &self,
        collection: &str,
        pending: &[String],
        failures: &mut Vec<ItemFailure>,
    ) -> Vec<ItemMetadata> {
        let mut items = Vec::with_capacity(pending.len());
        for identifier in pending {
            match self.source.fetch_metadata(identifier) {
                Ok(item) => items.push(item),
                Err(err) => {
                    let reason = err.to_string();
                    warn::emit(
                        ErrorCode::E007MetadataFetchFailed,
                        WarnEvent {
                            stage: SyncPhase::FetchDetails.as_str(),
                            action: "skip-item",
                            collection,
                            item: identifier,
                            retry: "not-retried",
                            reason: "metadata unavailable",
                            err: &truncate_with_ellipsis(&reason, MAX_WARN_ERR_CHARS),
                            ..WarnEvent::default()
                        },
                    );
                    failures.push(ItemFailure {
                        identifier: identifier.clone(),
                        phase: SyncPhase::FetchDetails,
                        reason,
                    });
                }
            }
        }
        self.audit(
            collection,
            SyncPhase::FetchDetails,
            "ok",
            &format!("resolved={}/{}", items.len(), pending.len()),
        );
        items
    }

    fn write_artifacts(
        &self,
        collection: &str,
        items: &[ItemMetadata],
        limits: RewriteLimits,
        failures: &mut Vec<ItemFailure>,
    ) -> (Vec<WrittenArtifact>, usize) {
        let mut written = Vec::with_capacity(items.len());
        let mut rewrite_failures = 0usize;

        for item in items {
            let choice = choose_transcript(&item.transcript_tracks, |track| {
                let rewriter = self.rewriter?;
                if !limits.admits(item.duration_secs, &track.raw_content) {
                    return None;
                }
                Some(rewriter.rewrite(item.title_or_default(), &track.raw_content))
            });

            for err in &choice.rewrite_failures {
                warn::emit(
                    ErrorCode::E008RewriteFailed,
                    WarnEvent {
                        stage: SyncPhase::WriteArtifacts.as_str(),
                        action: "use-raw-transcript",
                        collection,
                        item: &item.identifier,
                        reason: "rewrite failed",
                        err: &truncate_with_ellipsis(&err.to_string(), MAX_WARN_ERR_CHARS),
                        ..WarnEvent::default()
                    },
                );
            }
            rewrite_failures += choice.rewrite_failures.len();

            match self.writer.write(item, &choice.text) {
                Ok(path) => written.push(WrittenArtifact {
                    identifier: item.identifier.clone(),
                    path,
                    transcript: choice.origin,
                    language: choice.language_tag.clone(),
                }),
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn::emit(
                        ErrorCode::E006ArtifactWriteFailed,
                        WarnEvent {
                            stage: SyncPhase::WriteArtifacts.as_str(),
                            action: "skip-item",
                            collection,
                            item: &item.identifier,
                            path: &self.writer.output_dir().display().to_string(),
                            reason: "artifact write failed",
                            err: &truncate_with_ellipsis(&reason, MAX_WARN_ERR_CHARS),
                            ..WarnEvent::default()
                        },
                    );
                    failures.push(ItemFailure {
                        identifier: item.identifier.clone(),
                        phase: SyncPhase::WriteArtifacts,
                        reason,
                    });
                }
            }
        }

        self.audit(
            collection,
            SyncPhase::WriteArtifacts,
            "ok",
            &format!("written={}/{}", written.len(), items.len()),
        );
        (written, rewrite_failures)
    }

    fn append_snapshot(&self, collection: &str, recorded: BTreeSet<String>) -> SnapshotStatus {
        match self.records.append_snapshot(collection, Utc::now(), recorded) {
            Ok(appended) => {
                self.audit(
                    collection,
                    SyncPhase::AppendSnapshot,
                    "ok",
                    &appended.path.display().to_string(),
                );
                SnapshotStatus::Appended {
                    recorded: appended.snapshot.total_count(),
                    path: appended.path,
                }
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn::emit(
                    ErrorCode::E005HistoryWriteFailed,
                    WarnEvent {
                        stage: SyncPhase::AppendSnapshot.as_str(),
                        action: "keep-previous-history",
                        collection,
                        path: &self.records.dir().display().to_string(),
                        retry: "next-run",
                        reason: "next diff uses stale history",
                        err: &truncate_with_ellipsis(&reason, MAX_WARN_ERR_CHARS),
                        ..WarnEvent::default()
                    },
                );
                self.audit(collection, SyncPhase::AppendSnapshot, "failed", &reason);
                SnapshotStatus::Failed { reason }
            }
        }
    }
}
