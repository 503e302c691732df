use crate::error::RewriteError;
use crate::favsync::model::TranscriptTrack;
use crate::favsync::normalize::clean_text;

pub const MACHINE_TAG_PREFIX: &str = "ai-";
pub const MACHINE_CHINESE_TAG: &str = "ai-zh";
pub const NO_TRANSCRIPT: &str = "No transcript available";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptOrigin {
    Rewritten,
    Raw,
    Absent,
}

impl TranscriptOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rewritten => "rewritten",
            Self::Raw => "raw",
            Self::Absent => "absent",
        }
    }
}

#[derive(Debug)]
pub struct TranscriptChoice {
    pub text: String,
    pub origin: TranscriptOrigin,
    pub language_tag: Option<String>,
    pub rewrite_failures: Vec<RewriteError>,
}

fn is_human_track(track: &TranscriptTrack) -> bool {
    !track.language_tag.is_empty() && !track.language_tag.starts_with(MACHINE_TAG_PREFIX)
}

/// Pick the group of tracks worth reading: every human-authored track, or
/// failing that the machine-generated Chinese track. Empty means no
/// transcript, which is an ordinary outcome.
pub fn select_tracks(tracks: &[TranscriptTrack]) -> Vec<&TranscriptTrack> {
    let human = tracks
        .iter()
        .filter(|t| is_human_track(t))
        .collect::<Vec<_>>();
    if !human.is_empty() {
        return human;
    }
    tracks
        .iter()
        .filter(|t| t.language_tag == MACHINE_CHINESE_TAG)
        .take(1)
        .collect()
}

fn usable(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let cleaned = clean_text(text);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Resolve the transcript text for one item.
///
/// Per selected track, in order: stored rewritten content, then a fresh
/// rewrite from `rewrite` (which may decline with `None`), then the raw
/// content. The first track producing non-blank cleaned text wins and later
/// tracks are never consulted, so `rewrite` is only invoked as needed.
pub fn choose_transcript<F>(tracks: &[TranscriptTrack], mut rewrite: F) -> TranscriptChoice
where
    F: FnMut(&TranscriptTrack) -> Option<Result<String, RewriteError>>,
{
    let mut rewrite_failures = Vec::new();

    for track in select_tracks(tracks) {
        let stored = track.rewritten_content.as_deref().and_then(usable);
        let rewritten = stored.or_else(|| match rewrite(track)? {
            Ok(text) => usable(&text),
            Err(err) => {
                rewrite_failures.push(err);
                None
            }
        });
        if let Some(text) = rewritten {
            return TranscriptChoice {
                text,
                origin: TranscriptOrigin::Rewritten,
                language_tag: Some(track.language_tag.clone()),
                rewrite_failures,
            };
        }

        if let Some(text) = usable(&track.raw_content) {
            return TranscriptChoice {
                text,
                origin: TranscriptOrigin::Raw,
                language_tag: Some(track.language_tag.clone()),
                rewrite_failures,
            };
        }
    }

    TranscriptChoice {
        text: NO_TRANSCRIPT.to_string(),
        origin: TranscriptOrigin::Absent,
        language_tag: None,
        rewrite_failures,
    }
}
