use crate::error::SourceError;
use crate::favsync::model::{ItemMetadata, TimeValue, TranscriptTrack};
use crate::favsync::source::CollectionSource;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct DumpTrack {
    lan: String,
    lan_doc: String,
    subtitle_url: String,
    content: String,
    reformatted_content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct DumpSubtitles {
    subtitles: Vec<DumpTrack>,
}

#[derive(Debug, Clone, Deserialize)]
struct DumpRecord {
    bv: String,
    #[serde(default)]
    url_bv: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    time: Option<TimeValue>,
    #[serde(default)]
    up: Option<String>,
    #[serde(default)]
    fetch_time: Option<TimeValue>,
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    subtitle: DumpSubtitles,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DumpFile {
    Records(Vec<DumpRecord>),
    Collection {
        #[serde(default)]
        manifest: Option<Vec<String>>,
        items: Vec<DumpRecord>,
    },
}

impl From<DumpRecord> for ItemMetadata {
    fn from(record: DumpRecord) -> Self {
        ItemMetadata {
            identifier: record.bv,
            canonical_url: record.url_bv,
            title: record.title,
            description: record.desc,
            published_at: record.time,
            author: record.up,
            retrieved_at: record.fetch_time,
            duration_secs: record.duration,
            transcript_tracks: record
                .subtitle
                .subtitles
                .into_iter()
                .map(|t| TranscriptTrack {
                    language_tag: t.lan,
                    display_name: t.lan_doc,
                    source_url: t.subtitle_url,
                    raw_content: t.content,
                    rewritten_content: t.reformatted_content,
                })
                .collect(),
        }
    }
}

/// Offline source backed by a JSON dump of previously fetched item details.
#[derive(Debug, Clone)]
pub struct DumpSource {
    path: PathBuf,
    manifest: Vec<String>,
    records: HashMap<String, DumpRecord>,
}

impl DumpSource {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(path, &raw)
    }

    fn parse(path: &Path, raw: &str) -> Result<Self> {
        let parsed: DumpFile = serde_json::from_str(raw)
            .with_context(|| format!("failed to parse dump {}", path.display()))?;
        let (manifest, items) = match parsed {
            DumpFile::Records(items) => (None, items),
            DumpFile::Collection { manifest, items } => (manifest, items),
        };

        let manifest = manifest.unwrap_or_else(|| {
            items
                .iter()
                .filter(|r| r.success)
                .map(|r| r.bv.clone())
                .collect()
        });
        let records = items
            .into_iter()
            .map(|r| (r.bv.clone(), r))
            .collect::<HashMap<_, _>>();

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            records,
        })
    }
}

impl CollectionSource for DumpSource {
    fn fetch_manifest(&self, _collection_id: &str) -> Result<Vec<String>> {
        if self.manifest.is_empty() {
            anyhow::bail!("dump {} lists no items", self.path.display());
        }
        Ok(self.manifest.clone())
    }

    fn fetch_metadata(&self, identifier: &str) -> std::result::Result<ItemMetadata, SourceError> {
        match self.records.get(identifier) {
            Some(record) if record.success => Ok(record.clone().into()),
            _ => Err(SourceError::Missing(identifier.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = r#"[
        {"bv": "BV1", "title": "one", "time": 1700000000, "success": true,
         "subtitle": {"subtitles": [{"lan": "zh-CN", "lan_doc": "中文", "content": "hi"}]}},
        {"bv": "BV2", "success": false, "error": "gone"},
        {"bv": "BV3", "title": "three", "fetch_time": "2025-11-02T21:59:41", "success": true}
    ]"#;

    #[test]
    fn record_array_manifest_skips_failed_records() {
        let source = DumpSource::parse(Path::new("dump.json"), RECORDS).expect("parse");
        assert_eq!(
            source.fetch_manifest("any").expect("manifest"),
            vec!["BV1".to_string(), "BV3".to_string()]
        );

        let item = source.fetch_metadata("BV1").expect("BV1");
        assert_eq!(item.title.as_deref(), Some("one"));
        assert_eq!(item.published_at, Some(TimeValue::Epoch(1_700_000_000.0)));
        assert_eq!(item.transcript_tracks[0].language_tag, "zh-CN");
        assert_eq!(item.transcript_tracks[0].raw_content, "hi");

        assert!(matches!(
            source.fetch_metadata("BV2"),
            Err(SourceError::Missing(_))
        ));
        assert!(source.fetch_metadata("BV404").is_err());
    }

    #[test]
    fn explicit_manifest_overrides_record_order() {
        let raw = r#"{"manifest": ["BV9", "BV1"], "items": [{"bv": "BV1"}]}"#;
        let source = DumpSource::parse(Path::new("dump.json"), raw).expect("parse");
        assert_eq!(
            source.fetch_manifest("any").expect("manifest"),
            vec!["BV9".to_string(), "BV1".to_string()]
        );
        assert!(source.fetch_metadata("BV9").is_err());
    }

    #[test]
    fn records_without_success_flag_are_not_fetched() {
        let raw = r#"[{"bv": "BV1", "title": "t"}, {"bv": "BV2", "success": true}]"#;
        let source = DumpSource::parse(Path::new("dump.json"), raw).expect("parse");
        assert_eq!(
            source.fetch_manifest("any").expect("manifest"),
            vec!["BV2".to_string()]
        );
        assert!(matches!(
            source.fetch_metadata("BV1"),
            Err(SourceError::Missing(_))
        ));
    }

    #[test]
    fn unflagged_only_dump_has_no_manifest() {
        let raw = r#"[{"bv": "BV1", "title": "t"}]"#;
        let source = DumpSource::parse(Path::new("dump.json"), raw).expect("parse");
        assert!(source.fetch_manifest("any").is_err());
    }

    #[test]
    fn empty_dump_has_no_manifest() {
        let source = DumpSource::parse(Path::new("dump.json"), "[]").expect("parse");
        assert!(source.fetch_manifest("any").is_err());
    }
}
