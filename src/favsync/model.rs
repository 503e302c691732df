use serde::{Deserialize, Serialize};
use std::fmt;

/// A time-valued field as the remote side hands it over: either a numeric
/// epoch or an ISO-8601 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Epoch(f64),
    Text(String),
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeValue::Epoch(secs) if secs.fract() == 0.0 && secs.abs() < 1e15 => {
                write!(f, "{}", *secs as i64)
            }
            TimeValue::Epoch(secs) => write!(f, "{secs}"),
            TimeValue::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTrack {
    pub language_tag: String,
    pub display_name: String,
    pub source_url: String,
    pub raw_content: String,
    pub rewritten_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub identifier: String,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<TimeValue>,
    pub author: Option<String>,
    pub retrieved_at: Option<TimeValue>,
    pub duration_secs: Option<u64>,
    pub transcript_tracks: Vec<TranscriptTrack>,
}

impl ItemMetadata {
    pub fn title_or_default(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => crate::favsync::normalize::UNTITLED,
        }
    }
}
