use crate::favsync::model::TimeValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;

pub const UNTITLED: &str = "untitled";
pub const DEFAULT_MAX_FILENAME_CHARS: usize = 100;

const ILLEGAL_FILENAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H-%M-%S";
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn trim_name(input: &str) -> &str {
    input.trim_matches(|c: char| c.is_whitespace() || c == '.')
}

/// Turn an arbitrary title into a file stem that is safe on common
/// filesystems. Never fails; falls back to [`UNTITLED`].
pub fn sanitize_filename(raw_title: &str, max_length: usize) -> String {
    let mut out = String::with_capacity(raw_title.len());
    let mut prev_space = false;
    for ch in raw_title.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
            continue;
        }
        prev_space = false;
        if ILLEGAL_FILENAME_CHARS.contains(&ch) || ch.is_control() {
            out.push('_');
        } else {
            out.push(ch);
        }
    }

    let trimmed = trim_name(&out);
    let name = if trimmed.chars().count() > max_length {
        let cut: String = trimmed.chars().take(max_length).collect();
        trim_name(&cut).to_string()
    } else {
        trimmed.to_string()
    };

    if name.is_empty() {
        UNTITLED.to_string()
    } else {
        name
    }
}

fn format_epoch(secs: f64, tz: Tz) -> Option<String> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    let utc = DateTime::from_timestamp(whole as i64, nanos)?;
    Some(utc.with_timezone(&tz).format(DISPLAY_FORMAT).to_string())
}

fn format_iso(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let zoned = match trimmed.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => trimmed.to_string(),
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&zoned) {
        return Some(parsed.format(DISPLAY_FORMAT).to_string());
    }
    for pattern in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&zoned, pattern) {
            return Some(parsed.format(DISPLAY_FORMAT).to_string());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&zoned, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some(midnight.format(DISPLAY_FORMAT).to_string());
    }
    None
}

/// Render an epoch or ISO-8601 value as `YYYY-MM-DD HH-MM-SS`.
///
/// Epochs are shown in `tz`; ISO strings keep their own wall-clock time.
/// Values that do not parse are passed through unchanged.
pub fn normalize_timestamp(value: &TimeValue, tz: Tz) -> String {
    let formatted = match value {
        TimeValue::Epoch(secs) => format_epoch(*secs, tz),
        TimeValue::Text(text) => format_iso(text),
    };
    formatted.unwrap_or_else(|| value.to_string())
}

fn unescape_literals(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let replacement = match chars.peek() {
            Some('\\') => '\\',
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('"') => '"',
            Some('\'') => '\'',
            _ => {
                out.push('\\');
                continue;
            }
        };
        chars.next();
        out.push(replacement);
    }
    out
}

fn collapse_blank_runs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut newlines = 0usize;
    for ch in input.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push('\n');
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out
}

/// Clean free text lifted out of a JSON payload.
///
/// A doubled backslash is consumed as one literal backslash before any
/// single-character escape is considered, so `\\n` stays a backslash
/// followed by `n`.
pub fn clean_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let unescaped = unescape_literals(raw);
    let unified = unescaped.replace("\r\n", "\n").replace('\r', "\n");
    collapse_blank_runs(unified.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_illegal_characters() {
        let name = sanitize_filename("Video: <Test>/Name?", DEFAULT_MAX_FILENAME_CHARS);
        assert_eq!(name, "Video_ _Test__Name_");
        assert!(!name.chars().any(|c| ILLEGAL_FILENAME_CHARS.contains(&c)));
    }

    #[test]
    fn sanitize_collapses_whitespace_and_strips_dots() {
        assert_eq!(sanitize_filename("  ..a \t\n b.. ", 100), "a b");
        assert_eq!(sanitize_filename("...", 100), UNTITLED);
        assert_eq!(sanitize_filename("", 100), UNTITLED);
    }

    #[test]
    fn sanitize_truncates_by_characters_then_restrips() {
        assert_eq!(sanitize_filename("abc def", 4), "abc");
        assert_eq!(sanitize_filename("中文标题测试", 4), "中文标题");
    }

    #[test]
    fn timestamp_formats_epoch_in_zone() {
        let utc = normalize_timestamp(&TimeValue::Epoch(0.0), Tz::UTC);
        assert_eq!(utc, "1970-01-01 00-00-00");
        let shanghai = normalize_timestamp(&TimeValue::Epoch(0.0), chrono_tz::Asia::Shanghai);
        assert_eq!(shanghai, "1970-01-01 08-00-00");
    }

    #[test]
    fn timestamp_formats_iso_variants() {
        let zulu = TimeValue::Text("2024-01-02T03:04:05Z".to_string());
        assert_eq!(normalize_timestamp(&zulu, Tz::UTC), "2024-01-02 03-04-05");

        let offset = TimeValue::Text("2024-01-02T03:04:05+08:00".to_string());
        assert_eq!(normalize_timestamp(&offset, Tz::UTC), "2024-01-02 03-04-05");

        let naive = TimeValue::Text("2025-11-02T21:59:41.123456".to_string());
        assert_eq!(normalize_timestamp(&naive, Tz::UTC), "2025-11-02 21-59-41");
    }

    #[test]
    fn timestamp_passes_through_unparsable_values() {
        let junk = TimeValue::Text("yesterday-ish".to_string());
        assert_eq!(normalize_timestamp(&junk, Tz::UTC), "yesterday-ish");
        let huge = TimeValue::Epoch(1e300);
        assert_eq!(normalize_timestamp(&huge, Tz::UTC), huge.to_string());
    }

    #[test]
    fn clean_text_unescapes_without_eating_real_backslashes() {
        assert_eq!(clean_text("a\\nb\\\\c"), "a\nb\\c");
        assert_eq!(clean_text("say \\\"hi\\\" it\\'s\\tok"), "say \"hi\" it's\tok");
        assert_eq!(clean_text("path\\\\nope"), "path\\nope");
        assert_eq!(clean_text("trailing\\"), "trailing\\");
    }

    #[test]
    fn clean_text_normalizes_line_endings_and_blank_runs() {
        assert_eq!(clean_text("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(clean_text("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a\\n\\n\\n\\nb"), "a\n\nb");
        assert_eq!(clean_text("  \n keep \n\n  "), "keep");
    }

    #[test]
    fn clean_text_of_empty_is_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("   \\n  "), "");
    }
}
