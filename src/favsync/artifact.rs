use crate::favsync::model::ItemMetadata;
use crate::favsync::normalize::{normalize_timestamp, sanitize_filename};
use crate::favsync::util::persist_to_first_free;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};

pub const NO_DESCRIPTION: &str = "*No description*";
pub const TRANSCRIPT_HEADING: &str = "## Transcript";
const MAX_COLLISION_SUFFIX: usize = 10_000;

/// The archival subset of an item, in header order. Time fields are
/// already normalised; absent fields are `None` and left out of the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreFields {
    pub bv: String,
    pub url_bv: Option<String>,
    pub title: Option<String>,
    pub desc: Option<String>,
    pub time: Option<String>,
    pub up: Option<String>,
    pub fetch_time: Option<String>,
}

impl CoreFields {
    pub fn project(item: &ItemMetadata, tz: Tz) -> Self {
        Self {
            bv: item.identifier.clone(),
            url_bv: item.canonical_url.clone(),
            title: item.title.clone(),
            desc: item.description.clone(),
            time: item.published_at.as_ref().map(|v| normalize_timestamp(v, tz)),
            up: item.author.clone(),
            fetch_time: item.retrieved_at.as_ref().map(|v| normalize_timestamp(v, tz)),
        }
    }

    fn header_lines(&self) -> Vec<(&'static str, &str)> {
        let mut lines = vec![("bv", self.bv.as_str())];
        let optional = [
            ("url_bv", &self.url_bv),
            ("title", &self.title),
            ("time", &self.time),
            ("up", &self.up),
            ("fetch_time", &self.fetch_time),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                lines.push((key, value.as_str()));
            }
        }
        lines
    }
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn render_document(fields: &CoreFields, transcript: &str) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    for (key, value) in fields.header_lines() {
        out.push_str(&format!("{key}: {}\n", single_line(value)));
    }
    out.push_str("---\n\n");

    let title = fields
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(crate::favsync::normalize::UNTITLED);
    out.push_str(&format!("# {}\n\n", single_line(title)));

    match fields.desc.as_deref() {
        Some(desc) if !desc.trim().is_empty() => out.push_str(desc.trim_end()),
        _ => out.push_str(NO_DESCRIPTION),
    }
    out.push_str("\n\n");
    out.push_str(TRANSCRIPT_HEADING);
    out.push_str("\n\n");
    out.push_str(transcript);
    out.push('\n');
    out
}

/// Writes one Markdown document per archived item into `output_dir`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    max_name_chars: usize,
    tz: Tz,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>, max_name_chars: usize, tz: Tz) -> Self {
        Self {
            output_dir: output_dir.into(),
            max_name_chars,
            tz,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn candidates(&self, stem: &str) -> impl Iterator<Item = PathBuf> + '_ {
        let first = self.output_dir.join(format!("{stem}.md"));
        let stem = stem.to_string();
        std::iter::once(first).chain(
            (1..=MAX_COLLISION_SUFFIX)
                .map(move |n| self.output_dir.join(format!("{stem}_{n}.md"))),
        )
    }

    /// Render `item` with `transcript` and store it under a fresh name
    /// derived from the title: `{name}.md`, else `{name}_1.md`, `{name}_2.md`, …
    pub fn write(&self, item: &ItemMetadata, transcript: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;

        let fields = CoreFields::project(item, self.tz);
        let stem = sanitize_filename(item.title_or_default(), self.max_name_chars);
        let document = render_document(&fields, transcript);

        persist_to_first_free(&self.output_dir, document.as_bytes(), self.candidates(&stem))
            .with_context(|| format!("failed to write artifact for {}", item.identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::favsync::model::TimeValue;
    use tempfile::tempdir;

    fn item(id: &str, title: Option<&str>) -> ItemMetadata {
        ItemMetadata {
            identifier: id.to_string(),
            canonical_url: Some(format!("https://www.bilibili.com/video/{id}")),
            title: title.map(str::to_string),
            description: Some("line one\nline two".to_string()),
            published_at: Some(TimeValue::Epoch(1_700_000_000.0)),
            author: Some("uploader".to_string()),
            retrieved_at: Some(TimeValue::Text("2025-11-02T21:59:41Z".to_string())),
            duration_secs: Some(120),
            transcript_tracks: Vec::new(),
        }
    }

    #[test]
    fn document_has_header_body_and_transcript() {
        let fields = CoreFields::project(&item("BV1", Some("Hello")), Tz::UTC);
        let doc = render_document(&fields, "spoken words");
        let expected = "---\n\
bv: BV1\n\
url_bv: https://www.bilibili.com/video/BV1\n\
title: Hello\n\
time: 2023-11-14 22-13-20\n\
up: uploader\n\
fetch_time: 2025-11-02 21-59-41\n\
---\n\
\n\
# Hello\n\
\n\
line one\nline two\n\
\n\
## Transcript\n\
\n\
spoken words\n";
        assert_eq!(doc, expected);
    }

    #[test]
    fn blank_description_uses_placeholder_and_missing_fields_are_omitted() {
        let mut meta = item("BV2", None);
        meta.description = Some("   ".to_string());
        meta.canonical_url = None;
        let doc = render_document(&CoreFields::project(&meta, Tz::UTC), "x");
        assert!(doc.contains(NO_DESCRIPTION));
        assert!(!doc.contains("url_bv:"));
        assert!(!doc.contains("title:"));
        assert!(doc.contains("# untitled\n"));
    }

    #[test]
    fn colliding_titles_get_numeric_suffixes() {
        let tmp = tempdir().expect("tempdir");
        let writer = ArtifactWriter::new(tmp.path(), 100, Tz::UTC);

        let first = writer.write(&item("BV1", Some("Same: Title")), "a").expect("first");
        let second = writer.write(&item("BV2", Some("Same/ Title")), "b").expect("second");
        let third = writer.write(&item("BV3", Some("Same? Title")), "c").expect("third");

        assert_eq!(first, tmp.path().join("Same_ Title.md"));
        assert_eq!(second, tmp.path().join("Same_ Title_1.md"));
        assert_eq!(third, tmp.path().join("Same_ Title_2.md"));
        assert!(fs::read_to_string(&first).expect("read").contains("bv: BV1"));
        assert!(fs::read_to_string(&second).expect("read").contains("bv: BV2"));
    }

    #[test]
    fn unrelated_existing_file_is_never_overwritten() {
        let tmp = tempdir().expect("tempdir");
        let existing = tmp.path().join("Notes.md");
        fs::write(&existing, "hand written").expect("write");

        let writer = ArtifactWriter::new(tmp.path(), 100, Tz::UTC);
        let path = writer.write(&item("BV9", Some("Notes")), "t").expect("write");

        assert_eq!(path, tmp.path().join("Notes_1.md"));
        assert_eq!(fs::read_to_string(&existing).expect("read"), "hand written");
    }

    #[test]
    fn unwritable_output_dir_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, "file").expect("write");

        let writer = ArtifactWriter::new(blocker.join("out"), 100, Tz::UTC);
        assert!(writer.write(&item("BV1", Some("x")), "t").is_err());
    }
}
