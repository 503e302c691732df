use crate::error::ErrorCode;

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if !ch.is_control() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WarnEvent<'a> {
    pub stage: &'a str,
    pub action: &'a str,
    pub collection: &'a str,
    pub item: &'a str,
    pub path: &'a str,
    pub retry: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

pub fn format_line(code: ErrorCode, event: &WarnEvent<'_>) -> String {
    format!(
        "FAVSYNC_WARN code={} stage={} action={} collection={} item={} path={} retry={} reason={} err={}",
        code.as_str(),
        sanitize_value(event.stage),
        sanitize_value(event.action),
        sanitize_value(event.collection),
        sanitize_value(event.item),
        sanitize_value(event.path),
        sanitize_value(event.retry),
        sanitize_value(event.reason),
        sanitize_value(event.err),
    )
}

pub fn emit(code: ErrorCode, event: WarnEvent<'_>) {
    eprintln!("{}", format_line(code, &event));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_value_rewrites_whitespace() {
        assert_eq!(sanitize_value("a b\tc"), "a_b_c");
        assert_eq!(sanitize_value("标题 一"), "标题_一");
    }

    #[test]
    fn sanitize_value_falls_back_for_empty() {
        assert_eq!(sanitize_value("   "), "na");
    }

    #[test]
    fn line_carries_every_field() {
        let line = format_line(
            ErrorCode::E007MetadataFetchFailed,
            &WarnEvent {
                stage: "FETCH_DETAILS",
                action: "skip-item",
                collection: "42",
                item: "BV1",
                retry: "next-run",
                reason: "metadata unavailable",
                err: "request failed: timeout",
                ..WarnEvent::default()
            },
        );
        assert_eq!(
            line,
            "FAVSYNC_WARN code=E007_METADATA_FETCH_FAILED stage=FETCH_DETAILS action=skip-item collection=42 item=BV1 path=na retry=next-run reason=metadata_unavailable err=request_failed:_timeout"
        );
    }
}
