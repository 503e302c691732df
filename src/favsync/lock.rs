use crate::error::SyncError;
use crate::favsync::records::record_key;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on one collection's record directory. Released
/// when dropped.
#[derive(Debug)]
pub struct CollectionLock {
    file: File,
    path: PathBuf,
}

impl CollectionLock {
    pub fn lock_path(records_dir: &Path, collection_id: &str) -> PathBuf {
        records_dir.join(format!(".favsync-{}.lock", record_key(collection_id)))
    }

    pub fn acquire(records_dir: &Path, collection_id: &str) -> Result<Self> {
        fs::create_dir_all(records_dir)
            .with_context(|| format!("failed to create {}", records_dir.display()))?;
        let path = Self::lock_path(records_dir, collection_id);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(SyncError::CollectionLocked {
                collection: collection_id.to_string(),
            }
            .into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CollectionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let tmp = tempdir().expect("tempdir");
        let first = CollectionLock::acquire(tmp.path(), "42").expect("first");
        assert!(first.path().ends_with(".favsync-42.lock"));

        let err = CollectionLock::acquire(tmp.path(), "42").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::CollectionLocked { .. })
        ));

        let other = CollectionLock::acquire(tmp.path(), "43");
        assert!(other.is_ok());

        drop(first);
        assert!(CollectionLock::acquire(tmp.path(), "42").is_ok());
    }
}
