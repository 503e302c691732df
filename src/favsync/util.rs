use anyhow::{Context, Result};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Truncate `input` to at most `max_chars` Unicode characters, appending
/// `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    if input.chars().count() > max_chars {
        let mut s: String = input.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        input.to_string()
    }
}

fn write_temp(dir: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write temp file in {}", dir.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush temp file in {}", dir.display()))?;
    Ok(tmp)
}

/// Write `contents` to a temp file inside `dir`, then move it onto the first
/// candidate path that does not exist yet. An existing file is never
/// replaced, and a reader never observes a partially written target.
pub fn persist_to_first_free<I>(dir: &Path, contents: &[u8], candidates: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut tmp = write_temp(dir, contents)?;

    for candidate in candidates {
        if candidate.exists() {
            continue;
        }
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => tmp = err.file,
            Err(err) => {
                return Err(err.error)
                    .with_context(|| format!("failed to write {}", candidate.display()));
            }
        }
    }

    anyhow::bail!("no free file name left in {}", dir.display())
}

/// Atomically create `target` with `contents`. Returns `false` without
/// touching anything when `target` already exists.
pub fn persist_if_absent(dir: &Path, contents: &[u8], target: &Path) -> Result<bool> {
    if target.exists() {
        return Ok(false);
    }
    let tmp = write_temp(dir, contents)?;
    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => {
            Err(err.error).with_context(|| format!("failed to write {}", target.display()))
        }
    }
}
