//! Request and result types for store operations.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{FragmentId, FragmentType};
use crate::validation::MAX_ASSOCIATIVE_LINKS;

// ─────────────────────────────────────────────────────────────────────────────
// Commit
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a successful batch commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Fragments newly written.
    pub inserted: usize,
    /// Fragments whose id was already stored (a replayed batch).
    pub skipped: usize,
}

impl CommitReport {
    /// Total fragments in the batch.
    pub fn total(&self) -> usize {
        self.inserted + self.skipped
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata Update
// ─────────────────────────────────────────────────────────────────────────────

/// Follow-up write issued by the enrichment pipeline.
///
/// The update only adds: its tags and links are merged into whatever the
/// fragment carries at write time, inside the write transaction. Two updates
/// to the same fragment therefore never drop each other's additions.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    /// Fragment to update.
    pub id: FragmentId,
    /// Tags to add, in priority order.
    pub add_tags: Vec<String>,
    /// Links to add, in priority order.
    pub add_links: Vec<FragmentId>,
    /// Largest tag set the merge may produce.
    pub max_tags: usize,
    /// Longest link list the merge may produce.
    pub max_links: usize,
    /// `last_evolved` to record; never moves the stored value backwards.
    pub last_evolved: DateTime<Utc>,
}

impl MetadataUpdate {
    /// An empty update for `id`, capped at the validation link limit.
    pub fn new(id: FragmentId, last_evolved: DateTime<Utc>) -> Self {
        Self {
            id,
            add_tags: Vec::new(),
            add_links: Vec::new(),
            max_tags: usize::MAX,
            max_links: MAX_ASSOCIATIVE_LINKS,
            last_evolved,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.add_tags.extend(tags);
        self
    }

    pub fn with_links(mut self, links: impl IntoIterator<Item = FragmentId>) -> Self {
        self.add_links.extend(links);
        self
    }

    pub fn with_caps(mut self, max_links: usize, max_tags: usize) -> Self {
        self.max_links = max_links;
        self.max_tags = max_tags;
        self
    }

    /// Fold the additions into the current sets. Self-links, duplicates and
    /// anything past a cap are dropped.
    ///
    /// Returns `true` when either set changed.
    pub fn merge_into(&self, tags: &mut BTreeSet<String>, links: &mut Vec<FragmentId>) -> bool {
        let mut changed = false;

        for tag in &self.add_tags {
            if tags.len() >= self.max_tags {
                break;
            }
            changed |= tags.insert(tag.clone());
        }

        for link in &self.add_links {
            if links.len() >= self.max_links {
                break;
            }
            if *link != self.id && !links.contains(link) {
                links.push(link.clone());
                changed = true;
            }
        }

        changed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scans
// ─────────────────────────────────────────────────────────────────────────────

/// Index-only view of a fragment returned by scans (no payload decode).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentSummary {
    /// Fragment id.
    pub id: FragmentId,
    /// Kind of memory.
    pub fragment_type: FragmentType,
    /// Confidence score.
    pub confidence_score: f64,
    /// Category label.
    pub category: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Committed fragments.
    pub fragment_count: usize,
    /// Distinct categories.
    pub category_count: usize,
    /// Fragments carrying at least one associative link.
    pub linked_count: usize,
    /// Oldest creation time.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest creation time.
    pub newest: Option<DateTime<Utc>>,
    /// Schema version.
    pub schema_version: i32,
    /// Codec version recorded in the marker row.
    pub codec_version: u8,
    /// Database file, `None` for in-memory stores.
    pub path: Option<PathBuf>,
}
