use crate::favsync::normalize::DEFAULT_MAX_FILENAME_CHARS;
use crate::favsync::paths::FavsyncPaths;
use crate::favsync::rewrite::{DEFAULT_BASE_URL, DEFAULT_MODEL, RewriteLimits};
use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

include!(concat!(env!("OUT_DIR"), "/favsync_env_allowlist.rs"));

/// Which identifiers a run records as synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordPolicy {
    /// The whole current manifest, including items that failed this run.
    #[default]
    FullManifest,
    /// Previously synced items still present plus items written this run.
    WrittenOnly,
}

impl RecordPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullManifest => "full-manifest",
            Self::WrittenOnly => "written-only",
        }
    }
}

impl FromStr for RecordPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "full-manifest" => Ok(Self::FullManifest),
            "written-only" => Ok(Self::WrittenOnly),
            other => Err(anyhow!(
                "invalid record policy `{other}`: use `full-manifest` or `written-only`"
            )),
        }
    }
}

impl fmt::Display for RecordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    #[default]
    Bilibili,
    Dump,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bilibili => "bilibili",
            Self::Dump => "dump",
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "bilibili" => Ok(Self::Bilibili),
            "dump" => Ok(Self::Dump),
            other => Err(anyhow!("invalid source kind `{other}`: use `bilibili` or `dump`")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub collection_id: Option<String>,
    pub record_policy: RecordPolicy,
    pub max_filename_chars: usize,
    pub timezone: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            collection_id: None,
            record_policy: RecordPolicy::FullManifest,
            max_filename_chars: DEFAULT_MAX_FILENAME_CHARS,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub kind: SourceKind,
    pub dump_path: Option<PathBuf>,
    pub cookie_file: Option<PathBuf>,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            kind: SourceKind::Bilibili,
            dump_path: None,
            cookie_file: None,
            request_delay_ms: 1_000,
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteSection {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub max_source_chars: usize,
    pub max_duration_secs: u64,
    pub prompt_file: Option<PathBuf>,
}

impl Default for RewriteSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            timeout_secs: 40,
            max_source_chars: 8_000,
            max_duration_secs: 1_800,
            prompt_file: None,
        }
    }
}

impl RewriteSection {
    pub fn limits(&self) -> RewriteLimits {
        RewriteLimits {
            max_source_chars: self.max_source_chars,
            max_duration_secs: self.max_duration_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FavsyncConfig {
    pub sync: SyncSection,
    pub source: SourceSection,
    pub rewrite: RewriteSection,
}

impl FavsyncConfig {
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.sync.timezone)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialFavsyncConfig {
    sync: Option<SyncSection>,
    source: Option<SourceSection>,
    rewrite: Option<RewriteSection>,
}

fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| anyhow!("invalid timezone `{raw}`: {err}"))
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_string_first(vars: &[&str]) -> Option<String> {
    vars.iter().find_map(|var| match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    })
}

fn env_path(var: &str) -> Option<PathBuf> {
    env_string_first(&[var]).map(PathBuf::from)
}

pub fn validate(cfg: &FavsyncConfig) -> Result<()> {
    if cfg.sync.max_filename_chars == 0 {
        return Err(anyhow!("invalid max filename chars: must be >= 1"));
    }
    parse_timezone(&cfg.sync.timezone)?;
    if cfg
        .sync
        .collection_id
        .as_deref()
        .is_some_and(|id| id.trim().is_empty())
    {
        return Err(anyhow!("invalid collection id: cannot be empty"));
    }
    if cfg.source.kind == SourceKind::Dump && cfg.source.dump_path.is_none() {
        return Err(anyhow!("source kind `dump` requires source.dump_path"));
    }
    if cfg.source.request_timeout_secs == 0 {
        return Err(anyhow!("invalid source request timeout: must be >= 1 second"));
    }
    if cfg.rewrite.timeout_secs == 0 {
        return Err(anyhow!("invalid rewrite timeout: must be >= 1 second"));
    }
    if cfg.rewrite.enabled && cfg.rewrite.api_key.is_none() {
        return Err(anyhow!(
            "rewrite is enabled but no api key is set (rewrite.api_key, FAVSYNC_REWRITE_API_KEY or GLM_API_KEY)"
        ));
    }
    if cfg.rewrite.base_url.trim().is_empty() || cfg.rewrite.model.trim().is_empty() {
        return Err(anyhow!("rewrite base url and model cannot be empty"));
    }
    Ok(())
}

pub fn resolve_config_path(paths: &FavsyncPaths) -> PathBuf {
    match env::var("FAVSYNC_CONFIG") {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
        _ => paths.favsync_home.join("favsync.toml"),
    }
}

fn parse_file_config(path: &Path, raw: &str) -> Result<PartialFavsyncConfig> {
    toml::from_str(raw)
        .map_err(|err| anyhow!("failed to parse favsync config {}: {err}", path.display()))
}

fn merge_file_config(base: &mut FavsyncConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| anyhow!("failed to read {}: {err}", path.display()))?;
    let parsed = parse_file_config(path, &raw)?;
    if let Some(sync) = parsed.sync {
        base.sync = sync;
    }
    if let Some(source) = parsed.source {
        base.source = source;
    }
    if let Some(rewrite) = parsed.rewrite {
        base.rewrite = rewrite;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut FavsyncConfig) -> Result<()> {
    if let Some(id) = env_string_first(&["FAVSYNC_COLLECTION_ID"]) {
        cfg.sync.collection_id = Some(id);
    }
    if let Some(policy) = env_string_first(&["FAVSYNC_RECORD_POLICY"]) {
        cfg.sync.record_policy = policy.parse()?;
    }
    cfg.sync.max_filename_chars =
        env_or_usize("FAVSYNC_MAX_FILENAME_CHARS", cfg.sync.max_filename_chars);
    cfg.sync.timezone = env_or_string("FAVSYNC_TIMEZONE", &cfg.sync.timezone);

    if let Some(kind) = env_string_first(&["FAVSYNC_SOURCE"]) {
        cfg.source.kind = kind.parse()?;
    }
    if let Some(path) = env_path("FAVSYNC_DUMP_FILE") {
        cfg.source.dump_path = Some(path);
    }
    if let Some(path) = env_path("FAVSYNC_COOKIE_FILE") {
        cfg.source.cookie_file = Some(path);
    }
    cfg.source.request_delay_ms =
        env_or_u64("FAVSYNC_REQUEST_DELAY_MS", cfg.source.request_delay_ms);
    cfg.source.request_timeout_secs = env_or_u64(
        "FAVSYNC_REQUEST_TIMEOUT_SECS",
        cfg.source.request_timeout_secs,
    );

    cfg.rewrite.enabled = env_or_bool("FAVSYNC_REWRITE_ENABLED", cfg.rewrite.enabled);
    if cfg.rewrite.api_key.is_none() {
        cfg.rewrite.api_key = env_string_first(&["FAVSYNC_REWRITE_API_KEY", "GLM_API_KEY"]);
    }
    cfg.rewrite.base_url = env_or_string("FAVSYNC_REWRITE_BASE_URL", &cfg.rewrite.base_url);
    cfg.rewrite.model = env_or_string("FAVSYNC_REWRITE_MODEL", &cfg.rewrite.model);
    cfg.rewrite.temperature =
        env_or_f64("FAVSYNC_REWRITE_TEMPERATURE", cfg.rewrite.temperature);
    cfg.rewrite.timeout_secs =
        env_or_u64("FAVSYNC_REWRITE_TIMEOUT_SECS", cfg.rewrite.timeout_secs);
    cfg.rewrite.max_source_chars = env_or_usize(
        "FAVSYNC_REWRITE_MAX_SOURCE_CHARS",
        cfg.rewrite.max_source_chars,
    );
    cfg.rewrite.max_duration_secs = env_or_u64(
        "FAVSYNC_REWRITE_MAX_DURATION_SECS",
        cfg.rewrite.max_duration_secs,
    );
    if let Some(path) = env_path("FAVSYNC_REWRITE_PROMPT_FILE") {
        cfg.rewrite.prompt_file = Some(path);
    }
    Ok(())
}

/// Defaults, then the TOML file, then `FAVSYNC_*` environment overrides.
/// Not validated yet: command-line flags are applied on top by the caller.
pub fn load_config(paths: &FavsyncPaths) -> Result<FavsyncConfig> {
    let mut cfg = FavsyncConfig::default();
    merge_file_config(&mut cfg, &resolve_config_path(paths))?;
    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

/// Recognised environment keys that are currently set, for `status`.
pub fn active_env_overrides() -> Vec<String> {
    GENERATED_FAVSYNC_ENV_ALLOWLIST
        .iter()
        .chain(std::iter::once(&"GLM_API_KEY"))
        .filter(|key| env::var_os(key).is_some())
        .map(|key| key.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let cfg = FavsyncConfig::default();
        validate(&cfg).expect("defaults validate");
        assert_eq!(cfg.sync.record_policy, RecordPolicy::FullManifest);
        assert_eq!(cfg.source.request_delay_ms, 1_000);
        assert_eq!(cfg.rewrite.timeout_secs, 40);
        assert_eq!(cfg.timezone().expect("tz"), Tz::UTC);
    }

    #[test]
    fn file_sections_override_defaults_and_keep_missing_keys() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("favsync.toml");
        fs::write(
            &path,
            r#"
[sync]
collection_id = "3656879060"
record_policy = "written-only"
timezone = "Asia/Shanghai"

[source]
kind = "dump"
dump_path = "/tmp/dump.json"
"#,
        )
        .expect("write");

        let mut cfg = FavsyncConfig::default();
        merge_file_config(&mut cfg, &path).expect("merge");
        assert_eq!(cfg.sync.collection_id.as_deref(), Some("3656879060"));
        assert_eq!(cfg.sync.record_policy, RecordPolicy::WrittenOnly);
        assert_eq!(cfg.sync.max_filename_chars, DEFAULT_MAX_FILENAME_CHARS);
        assert_eq!(cfg.source.kind, SourceKind::Dump);
        assert_eq!(cfg.source.request_delay_ms, 1_000);
        assert_eq!(cfg.timezone().expect("tz"), chrono_tz::Asia::Shanghai);
        validate(&cfg).expect("valid");
    }

    #[test]
    fn missing_file_is_fine_and_malformed_file_is_not() {
        let tmp = tempdir().expect("tempdir");
        let mut cfg = FavsyncConfig::default();
        merge_file_config(&mut cfg, &tmp.path().join("absent.toml")).expect("absent");

        let bad = tmp.path().join("bad.toml");
        fs::write(&bad, "[sync]\nrecord_policy = \"sometimes\"\n").expect("write");
        assert!(merge_file_config(&mut cfg, &bad).is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = FavsyncConfig::default();
        cfg.sync.max_filename_chars = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = FavsyncConfig::default();
        cfg.sync.timezone = "Mars/Olympus".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = FavsyncConfig::default();
        cfg.rewrite.enabled = true;
        assert!(validate(&cfg).is_err());
        cfg.rewrite.api_key = Some("key".to_string());
        validate(&cfg).expect("valid with key");
        cfg.rewrite.timeout_secs = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = FavsyncConfig::default();
        cfg.source.kind = SourceKind::Dump;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn policy_and_kind_parse_from_strings() {
        assert_eq!(
            "written-only".parse::<RecordPolicy>().expect("policy"),
            RecordPolicy::WrittenOnly
        );
        assert!("all".parse::<RecordPolicy>().is_err());
        assert_eq!("dump".parse::<SourceKind>().expect("kind"), SourceKind::Dump);
        assert_eq!(RecordPolicy::FullManifest.to_string(), "full-manifest");
    }

    #[test]
    fn allowlist_covers_override_keys() {
        for key in [
            "FAVSYNC_HOME",
            "FAVSYNC_CONFIG",
            "FAVSYNC_COLLECTION_ID",
            "FAVSYNC_REWRITE_API_KEY",
        ] {
            assert!(
                GENERATED_FAVSYNC_ENV_ALLOWLIST.contains(&key),
                "missing {key}"
            );
        }
    }
}
