use crate::error::{ErrorCode, SourceError};
use crate::favsync::model::{ItemMetadata, TimeValue, TranscriptTrack};
use crate::favsync::source::CollectionSource;
use crate::favsync::transcript::select_tracks;
use crate::favsync::util::truncate_with_ellipsis;
use crate::favsync::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use reqwest::blocking::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde_json::Value;
use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const API_BASE: &str = "https://api.bilibili.com";
const VIDEO_URL_BASE: &str = "https://www.bilibili.com/video";
const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const VIDEO_RESOURCE_TYPE: i64 = 2;
const MAX_WARN_ERR_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct BilibiliSettings {
    pub cookie: Option<String>,
    pub request_delay: Duration,
    pub request_timeout: Duration,
}

/// Read a cookie file: either a raw `Cookie:` header value, or one
/// `name=value` / `name\tvalue` pair per line.
pub fn load_cookie_file(path: &Path) -> Result<String> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let pairs = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('\t') {
            Some((name, value)) if !line.contains('=') => format!("{}={}", name.trim(), value.trim()),
            _ => line.trim_end_matches(';').to_string(),
        })
        .collect::<Vec<_>>();
    if pairs.is_empty() {
        anyhow::bail!("cookie file {} is empty", path.display());
    }
    Ok(pairs.join("; "))
}

/// Blocking client for the public web API. Requests are spaced by at least
/// `request_delay` to stay under the remote rate limit.
pub struct BilibiliClient {
    client: Client,
    request_delay: Duration,
    last_request: Cell<Option<Instant>>,
}

impl BilibiliClient {
    pub fn new(settings: BilibiliSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_UA));
        headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com"));
        if let Some(cookie) = settings.cookie.as_deref() {
            let value = HeaderValue::from_str(cookie).context("cookie contains invalid characters")?;
            headers.insert(COOKIE, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .context("failed to build bilibili http client")?;
        Ok(Self {
            client,
            request_delay: settings.request_delay,
            last_request: Cell::new(None),
        })
    }

    fn throttle(&self) {
        if let Some(last) = self.last_request.get() {
            let elapsed = last.elapsed();
            if elapsed < self.request_delay {
                thread::sleep(self.request_delay - elapsed);
            }
        }
        self.last_request.set(Some(Instant::now()));
    }

    fn get_json(&self, url: &str) -> std::result::Result<Value, SourceError> {
        self.throttle();
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SourceError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .map_err(|err| SourceError::Decode(err.to_string()))
    }

    fn get_api_data(&self, url: &str) -> std::result::Result<Value, SourceError> {
        unwrap_envelope(self.get_json(url)?)
    }

    fn fetch_track_content(&self, url: &str) -> std::result::Result<String, SourceError> {
        let absolute = absolute_url(url);
        let body = self.get_json(&absolute)?;
        Ok(join_subtitle_body(&body))
    }
}

fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

fn unwrap_envelope(json: Value) -> std::result::Result<Value, SourceError> {
    let code = json.get("code").and_then(Value::as_i64).unwrap_or(-1);
    if code != 0 {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(SourceError::Api { code, message });
    }
    json.get("data")
        .cloned()
        .ok_or_else(|| SourceError::Decode("response has no data field".to_string()))
}

fn parse_manifest(data: &Value) -> Vec<String> {
    data.as_array()
        .map(|entries| {
            entries
                .iter()
                .filter(|e| e.get("type").and_then(Value::as_i64) == Some(VIDEO_RESOURCE_TYPE))
                .filter_map(|e| e.get("bvid").or_else(|| e.get("bv_id")))
                .filter_map(Value::as_str)
                .filter(|bv| !bv.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_view(identifier: &str, data: &Value) -> ItemMetadata {
    let bv = str_field(data, "bvid").unwrap_or_else(|| identifier.to_string());
    ItemMetadata {
        canonical_url: Some(format!("{VIDEO_URL_BASE}/{bv}")),
        identifier: bv,
        title: str_field(data, "title"),
        description: str_field(data, "desc"),
        published_at: data
            .get("pubdate")
            .and_then(Value::as_i64)
            .map(|secs| TimeValue::Epoch(secs as f64)),
        author: data.get("owner").and_then(|o| str_field(o, "name")),
        retrieved_at: None,
        duration_secs: data.get("duration").and_then(Value::as_u64),
        transcript_tracks: Vec::new(),
    }
}

fn parse_tracks(player: &Value) -> Vec<TranscriptTrack> {
    player
        .get("subtitle")
        .and_then(|s| s.get("subtitles"))
        .and_then(Value::as_array)
        .map(|subs| {
            subs.iter()
                .map(|sub| TranscriptTrack {
                    language_tag: str_field(sub, "lan").unwrap_or_default(),
                    display_name: str_field(sub, "lan_doc").unwrap_or_default(),
                    source_url: str_field(sub, "subtitle_url").unwrap_or_default(),
                    raw_content: String::new(),
                    rewritten_content: None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn join_subtitle_body(body: &Value) -> String {
    body.get("body")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|line| line.get("content").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Download the content of every selected track through `fetch`. A track
/// whose download fails stays empty and is reported, so the item can still
/// fall back to another track or the placeholder. Returns the failed URLs.
fn fill_selected_tracks<F>(
    identifier: &str,
    tracks: &mut [TranscriptTrack],
    mut fetch: F,
) -> Vec<String>
where
    F: FnMut(&str) -> std::result::Result<String, SourceError>,
{
    let wanted = select_tracks(tracks)
        .into_iter()
        .map(|t| t.source_url.clone())
        .collect::<Vec<_>>();
    let mut failed = Vec::new();
    for track in tracks.iter_mut() {
        if track.source_url.is_empty() || !wanted.contains(&track.source_url) {
            continue;
        }
        match fetch(&track.source_url) {
            Ok(content) => track.raw_content = content,
            Err(err) => {
                warn::emit(
                    ErrorCode::E007MetadataFetchFailed,
                    WarnEvent {
                        stage: "FETCH_DETAILS",
                        action: "skip-transcript-track",
                        item: identifier,
                        path: &track.source_url,
                        retry: "not-retried",
                        reason: "subtitle download failed",
                        err: &truncate_with_ellipsis(&err.to_string(), MAX_WARN_ERR_CHARS),
                        ..WarnEvent::default()
                    },
                );
                failed.push(track.source_url.clone());
            }
        }
    }
    failed
}

impl CollectionSource for BilibiliClient {
    fn fetch_manifest(&self, collection_id: &str) -> Result<Vec<String>> {
        let url = format!("{API_BASE}/x/v3/fav/resource/ids?media_id={collection_id}&platform=web");
        let data = self
            .get_api_data(&url)
            .with_context(|| format!("failed to list favorites {collection_id}"))?;
        Ok(parse_manifest(&data))
    }

    fn fetch_metadata(&self, identifier: &str) -> std::result::Result<ItemMetadata, SourceError> {
        let view = self.get_api_data(&format!(
            "{API_BASE}/x/web-interface/view?bvid={identifier}"
        ))?;
        let mut item = parse_view(identifier, &view);
        item.retrieved_at = Some(TimeValue::Text(
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ));

        let Some(cid) = view.get("cid").and_then(Value::as_i64) else {
            return Ok(item);
        };
        let player = self.get_api_data(&format!(
            "{API_BASE}/x/player/v2?bvid={}&cid={cid}",
            item.identifier
        ))?;
        let mut tracks = parse_tracks(&player);
        fill_selected_tracks(&item.identifier, &mut tracks, |url| {
            self.fetch_track_content(url)
        });
        item.transcript_tracks = tracks;
        Ok(item)
    }
}
