use crate::error::{RewriteError, SourceError};
use crate::favsync::model::ItemMetadata;
use anyhow::Result;

/// Where collection membership and per-item details come from.
pub trait CollectionSource {
    /// Current identifiers of the collection, in remote order.
    fn fetch_manifest(&self, collection_id: &str) -> Result<Vec<String>>;

    /// Details for a single item. Failures only skip that item.
    fn fetch_metadata(&self, identifier: &str) -> std::result::Result<ItemMetadata, SourceError>;
}

/// Optional best-effort text rewriting service.
pub trait Rewriter {
    fn rewrite(&self, topic: &str, text: &str) -> std::result::Result<String, RewriteError>;
}
