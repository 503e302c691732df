use crate::favsync::util::persist_if_absent;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const RECORD_PREFIX: &str = "sync_record_";
const RECORD_EXT: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

/// One immutable record of which identifiers a collection had synced as of
/// `sync_time`. Identifiers are kept sorted and unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    #[serde(alias = "media_id", deserialize_with = "string_or_number")]
    collection_id: String,
    sync_time: String,
    synced_bvs: Vec<String>,
    #[serde(default)]
    total_count: usize,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(num) => num.to_string(),
    })
}

impl SyncSnapshot {
    pub fn new<I>(collection_id: &str, taken_at: DateTime<Utc>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let synced_bvs = identifiers
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        Self {
            collection_id: collection_id.to_string(),
            sync_time: taken_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            total_count: synced_bvs.len(),
            synced_bvs,
        }
    }

    fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.sync_time = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        self
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn sync_time(&self) -> &str {
        &self.sync_time
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn to_set(&self) -> HashSet<String> {
        self.synced_bvs.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub stamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStatus {
    /// No snapshot exists yet: first-ever sync.
    Missing,
    Loaded { path: PathBuf },
    /// History exists but could not be used; the run proceeds as a first sync.
    Unusable { path: Option<PathBuf>, reason: String },
}

impl HistoryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Loaded { .. } => "loaded",
            Self::Unusable { .. } => "unusable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryLoad {
    pub synced: HashSet<String>,
    pub status: HistoryStatus,
}

impl HistoryLoad {
    fn empty(status: HistoryStatus) -> Self {
        Self {
            synced: HashSet::new(),
            status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppendedSnapshot {
    pub path: PathBuf,
    pub snapshot: SyncSnapshot,
}

/// Filesystem-safe form of a collection id used in snapshot file names.
pub fn record_key(collection_id: &str) -> String {
    collection_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

fn parse_stamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn is_stamp(raw: &str) -> bool {
    raw.len() == STAMP_LEN
        && raw.char_indices().all(|(idx, ch)| {
            if idx == 8 {
                ch == '_'
            } else {
                ch.is_ascii_digit()
            }
        })
}

/// Append-only store of sync snapshots, one JSON file per run.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(collection_id: &str, stamp: &str) -> String {
        format!(
            "{RECORD_PREFIX}{}_{stamp}{RECORD_EXT}",
            record_key(collection_id)
        )
    }

    /// All snapshots of `collection_id`, oldest first.
    pub fn list(&self, collection_id: &str) -> Result<Vec<SnapshotEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{RECORD_PREFIX}{}_", record_key(collection_id));
        let read_dir = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read {}", self.dir.display()))?;

        let mut out = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(RECORD_EXT))
            else {
                continue;
            };
            if !is_stamp(stamp) || !path.is_file() {
                continue;
            }
            out.push(SnapshotEntry {
                stamp: stamp.to_string(),
                path,
            });
        }
        out.sort_by(|a, b| a.stamp.cmp(&b.stamp));
        Ok(out)
    }

    pub fn read(path: &Path) -> Result<SyncSnapshot> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: SyncSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(parsed)
    }

    /// Identifiers recorded by the newest snapshot. Never fails: a missing
    /// history is the first-sync signal, an unreadable one degrades to it.
    pub fn load_latest(&self, collection_id: &str) -> HistoryLoad {
        let entries = match self.list(collection_id) {
            Ok(entries) => entries,
            Err(err) => {
                return HistoryLoad::empty(HistoryStatus::Unusable {
                    path: None,
                    reason: format!("{err:#}"),
                });
            }
        };
        let Some(latest) = entries.last() else {
            return HistoryLoad::empty(HistoryStatus::Missing);
        };

        match Self::read(&latest.path) {
            Ok(snapshot) if snapshot.collection_id() != collection_id => {
                HistoryLoad::empty(HistoryStatus::Unusable {
                    path: Some(latest.path.clone()),
                    reason: format!(
                        "snapshot belongs to collection {}, not {collection_id}",
                        snapshot.collection_id()
                    ),
                })
            }
            Ok(snapshot) => HistoryLoad {
                synced: snapshot.to_set(),
                status: HistoryStatus::Loaded {
                    path: latest.path.clone(),
                },
            },
            Err(err) => HistoryLoad::empty(HistoryStatus::Unusable {
                path: Some(latest.path.clone()),
                reason: format!("{err:#}"),
            }),
        }
    }

    /// Persist a new snapshot stamped at `taken_at` (second resolution).
    ///
    /// The stamp never sorts at or before the newest existing one: it starts
    /// one second past that stamp when the clock is behind it, and a name
    /// already taken is bumped forward one second at a time. The chosen stamp
    /// is also the snapshot's `sync_time`.
    pub fn append_snapshot<I>(
        &self,
        collection_id: &str,
        taken_at: DateTime<Utc>,
        identifiers: I,
    ) -> Result<AppendedSnapshot>
    where
        I: IntoIterator<Item = String>,
    {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let snapshot = SyncSnapshot::new(collection_id, taken_at, identifiers);
        let floor = self
            .list(collection_id)?
            .last()
            .and_then(|entry| parse_stamp(&entry.stamp))
            .map(|newest| newest + Duration::seconds(1));
        let start = match floor {
            Some(floor) if floor > taken_at.trunc_subsecs(0) => floor,
            _ => taken_at.trunc_subsecs(0),
        };

        for bump in 0_i64.. {
            let at = start + Duration::seconds(bump);
            let path = self.dir.join(Self::file_name(
                collection_id,
                &at.format(STAMP_FORMAT).to_string(),
            ));
            if path.exists() {
                continue;
            }
            let snapshot = snapshot.clone().stamped(at);
            let data = serde_json::to_string_pretty(&snapshot)?;
            if persist_if_absent(&self.dir, format!("{data}\n").as_bytes(), &path)? {
                return Ok(AppendedSnapshot { path, snapshot });
            }
        }
        anyhow::bail!("no free snapshot name left in {}", self.dir.display())
    }
}
