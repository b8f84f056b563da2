//! Backend trait for pluggable fragment storage.
//!
//! The write-ahead buffer and the enrichment workers only talk to storage
//! through [`FragmentBackend`], so the SQLite [`FragmentStore`] can be wrapped
//! (e.g., to inject transient commit failures in tests) or replaced.
//!
//! [`FragmentStore`]: crate::FragmentStore

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Result;
use crate::store::{CommitReport, FragmentStore, FragmentSummary, MetadataUpdate};
use crate::types::{Fragment, FragmentId};

/// Trait for fragment storage backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. Writes are expected to be
/// serialized internally; reads may run concurrently with a write.
pub trait FragmentBackend: Send + Sync {
    /// Commit a batch of fragments atomically: either every fragment becomes
    /// visible or none does.
    ///
    /// Fragments whose id is already stored are skipped, which makes a retry
    /// of an already-applied batch harmless.
    fn batch_commit(&self, fragments: &[Fragment]) -> Result<CommitReport>;

    /// Get a committed fragment by id. Returns `Ok(None)` if it is unknown.
    fn get(&self, id: &FragmentId) -> Result<Option<Fragment>>;

    /// Merge tags and links into a fragment and bump `last_evolved`, without
    /// rewriting its payload. The merge happens against the stored sets in
    /// the same transaction as the write. Returns `false` if the id is
    /// unknown or nothing changed.
    fn update_metadata(&self, update: &MetadataUpdate) -> Result<bool>;

    /// Number of committed fragments.
    fn count(&self) -> Result<usize>;

    /// Most recent fragments in a category, newest first, excluding `exclude`.
    fn by_category(
        &self,
        category: &str,
        exclude: &FragmentId,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>>;

    /// Up to `limit` fragments created within `window` of `at`, nearest
    /// first, excluding `exclude`.
    fn created_near(
        &self,
        at: DateTime<Utc>,
        window: TimeDelta,
        exclude: &FragmentId,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>>;
}

impl FragmentBackend for FragmentStore {
    fn batch_commit(&self, fragments: &[Fragment]) -> Result<CommitReport> {
        FragmentStore::batch_commit(self, fragments)
    }

    fn get(&self, id: &FragmentId) -> Result<Option<Fragment>> {
        self.get_fragment(id)
    }

    fn update_metadata(&self, update: &MetadataUpdate) -> Result<bool> {
        FragmentStore::update_metadata(self, update)
    }

    fn count(&self) -> Result<usize> {
        FragmentStore::count(self)
    }

    fn by_category(
        &self,
        category: &str,
        exclude: &FragmentId,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>> {
        FragmentStore::by_category(self, category, exclude, limit)
    }

    fn created_near(
        &self,
        at: DateTime<Utc>,
        window: TimeDelta,
        exclude: &FragmentId,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>> {
        FragmentStore::created_near(self, at, window, exclude, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_store_as_trait_object() {
        let backend: Arc<dyn FragmentBackend> = Arc::new(FragmentStore::open_in_memory().unwrap());
        let fragment = Fragment::new("trait object write", "notes");

        let report = backend.batch_commit(std::slice::from_ref(&fragment)).unwrap();
        assert_eq!(report.total(), 1);
        assert_eq!(backend.count().unwrap(), 1);
        assert_eq!(backend.get(&fragment.id).unwrap().unwrap(), fragment);

        let others = backend.by_category("notes", &fragment.id, 5).unwrap();
        assert!(others.is_empty());
        let near = backend
            .created_near(fragment.created_at, TimeDelta::minutes(1), &fragment.id, 5)
            .unwrap();
        assert!(near.is_empty());
    }
}
