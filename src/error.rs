use thiserror::Error;

/// Failures that abort a whole sync run. Everything finer-grained is
/// recorded on the run outcome instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("collection id is invalid: {0}")]
    InvalidCollectionId(String),
    #[error("collection {collection} is locked by another sync run")]
    CollectionLocked { collection: String },
    #[error("collection manifest unavailable for {collection}: {reason}")]
    ManifestUnavailable { collection: String, reason: String },
    #[error("none of the {pending} pending items of {collection} could be resolved")]
    NoResolvableItems { collection: String, pending: usize },
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCollectionId(_) => ErrorCode::E009InvalidInput,
            Self::CollectionLocked { .. } => ErrorCode::E001Locked,
            Self::ManifestUnavailable { .. } => ErrorCode::E002ManifestUnavailable,
            Self::NoResolvableItems { .. } => ErrorCode::E003NoResolvableItems,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("remote api returned code {code}: {message}")]
    Api { code: i64, message: String },
    #[error("item {0} not present in source")]
    Missing(String),
    #[error("unexpected payload: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewrite timed out after {0}s")]
    Timeout(u64),
    #[error("rewrite transport error: {0}")]
    Transport(String),
    #[error("rewrite service returned status {0}")]
    Status(u16),
    #[error("rewrite response malformed: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001Locked,
    E002ManifestUnavailable,
    E003NoResolvableItems,
    E004HistoryCorrupt,
    E005HistoryWriteFailed,
    E006ArtifactWriteFailed,
    E007MetadataFetchFailed,
    E008RewriteFailed,
    E009InvalidInput,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ManifestUnavailable => "E002_MANIFEST_UNAVAILABLE",
            Self::E003NoResolvableItems => "E003_NO_RESOLVABLE_ITEMS",
            Self::E004HistoryCorrupt => "E004_HISTORY_CORRUPT",
            Self::E005HistoryWriteFailed => "E005_HISTORY_WRITE_FAILED",
            Self::E006ArtifactWriteFailed => "E006_ARTIFACT_WRITE_FAILED",
            Self::E007MetadataFetchFailed => "E007_METADATA_FETCH_FAILED",
            Self::E008RewriteFailed => "E008_REWRITE_FAILED",
            Self::E009InvalidInput => "E009_INVALID_INPUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, SyncError};

    #[test]
    fn sync_errors_map_to_stable_codes() {
        let err = SyncError::CollectionLocked {
            collection: "42".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::E001Locked);
        assert_eq!(err.code().as_str(), "E001_LOCKED");

        let err = SyncError::NoResolvableItems {
            collection: "42".to_string(),
            pending: 3,
        };
        assert_eq!(err.code().as_str(), "E003_NO_RESOLVABLE_ITEMS");
        assert!(err.to_string().contains("3 pending items"));
    }
}
