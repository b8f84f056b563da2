//! Fragment write and point-read operations.

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::codec::{self, MetadataRecord};
use crate::error::Result;
use crate::types::{Fragment, FragmentId, FragmentType};

use super::query::{CommitReport, MetadataUpdate};
use super::{FragmentStore, micros_to_datetime};

/// Columns selected for a full fragment read, core table joined to metadata.
pub(crate) const FRAGMENT_COLUMNS: &str = r#"
    f.id, f.payload, f.fragment_type, f.confidence_score, f.created_at, f.last_evolved,
    m.category, m.temporal_tags, m.symbolic_tags, m.associative_links,
    m.access_pattern, m.narrative_role
"#;

impl FragmentStore {
    /// Commit a batch of fragments in one transaction.
    ///
    /// Both tables are written for every fragment or, on any failure, for
    /// none of them. Ids already present are skipped, so replaying a batch
    /// whose earlier attempt landed leaves exactly one copy of each row.
    pub fn batch_commit(&self, fragments: &[Fragment]) -> Result<CommitReport> {
        if fragments.is_empty() {
            return Ok(CommitReport::default());
        }

        // Encode outside the lock.
        let rows = fragments
            .iter()
            .map(|f| -> Result<_> {
                Ok((f, codec::encode_content(f)?, MetadataRecord::from_fragment(f)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let report = self.with_transaction(|conn| {
            let mut core_stmt = conn.prepare_cached(
                r#"
                INSERT INTO fragments (id, payload, fragment_type, confidence_score, created_at, last_evolved)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO NOTHING
                "#,
            )?;
            let mut meta_stmt = conn.prepare_cached(
                r#"
                INSERT INTO fragment_metadata (id, category, temporal_tags, symbolic_tags,
                                               associative_links, access_pattern, narrative_role)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO NOTHING
                "#,
            )?;

            let mut report = CommitReport::default();
            for (fragment, payload, record) in &rows {
                let inserted = core_stmt.execute(params![
                    fragment.id.as_str(),
                    payload,
                    fragment.fragment_type.code(),
                    fragment.confidence_score,
                    fragment.created_at.timestamp_micros(),
                    fragment.last_evolved.timestamp_micros(),
                ])?;

                if inserted == 0 {
                    report.skipped += 1;
                    continue;
                }

                meta_stmt.execute(params![
                    fragment.id.as_str(),
                    record.category,
                    record.temporal_tags,
                    record.symbolic_tags,
                    record.associative_links,
                    record.access_pattern,
                    record.narrative_role,
                ])?;
                report.inserted += 1;
            }
            Ok(report)
        })?;

        debug!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Committed fragment batch"
        );
        Ok(report)
    }

    /// Get a fragment by id.
    pub fn get_fragment(&self, id: &FragmentId) -> Result<Option<Fragment>> {
        self.with_reader(|conn| Self::read_fragment(conn, id))
    }

    pub(crate) fn read_fragment(conn: &Connection, id: &FragmentId) -> Result<Option<Fragment>> {
        let sql = format!(
            "SELECT {} FROM fragments f JOIN fragment_metadata m ON m.id = f.id WHERE f.id = ?1",
            FRAGMENT_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_row(params![id.as_str()], RawFragment::from_row)
            .optional()?;

        raw.map(RawFragment::into_fragment).transpose()
    }

    /// Merge an update's tags and links into a fragment and bump `last_evolved`.
    ///
    /// The current sets are read and rewritten inside one `IMMEDIATE`
    /// transaction, so concurrent updates to the same fragment both land.
    /// Only the `last_evolved` column of the core row is written and it never
    /// moves backwards. Returns `false`, writing nothing, if the fragment
    /// doesn't exist or the update adds nothing new.
    pub fn update_metadata(&self, update: &MetadataUpdate) -> Result<bool> {
        let changed = self.with_transaction(|conn| {
            let current: Option<(String, String)> = conn
                .query_row(
                    "SELECT symbolic_tags, associative_links FROM fragment_metadata WHERE id = ?1",
                    params![update.id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((tags_column, links_column)) = current else {
                return Ok(false);
            };

            let mut tags = codec::decode_tags(&tags_column)?;
            let mut links = codec::decode_links(&links_column)?;
            if !update.merge_into(&mut tags, &mut links) {
                return Ok(false);
            }

            conn.execute(
                "UPDATE fragment_metadata SET symbolic_tags = ?2, associative_links = ?3 WHERE id = ?1",
                params![
                    update.id.as_str(),
                    codec::encode_tags(&tags)?,
                    codec::encode_links(&links)?
                ],
            )?;
            conn.execute(
                "UPDATE fragments SET last_evolved = MAX(last_evolved, ?2) WHERE id = ?1",
                params![update.id.as_str(), update.last_evolved.timestamp_micros()],
            )?;
            Ok(true)
        })?;

        if changed {
            debug!(id = %update.id, "Updated fragment metadata");
        }
        Ok(changed)
    }

    /// Record a read of a fragment. Returns `false` if the fragment doesn't exist.
    pub fn touch(&self, id: &FragmentId) -> Result<bool> {
        let conn = self.writer.lock();
        let rows = conn.execute(
            r#"
            UPDATE fragment_metadata
            SET access_pattern = json_set(
                access_pattern,
                '$.access_count',
                json_extract(access_pattern, '$.access_count') + 1
            )
            WHERE id = ?1
            "#,
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row Conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Column values of one joined row, decoded after the statement is done.
struct RawFragment {
    id: String,
    payload: Vec<u8>,
    fragment_type: i64,
    confidence_score: f64,
    created_at: i64,
    last_evolved: i64,
    record: MetadataRecord,
}

impl RawFragment {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            fragment_type: row.get(2)?,
            confidence_score: row.get(3)?,
            created_at: row.get(4)?,
            last_evolved: row.get(5)?,
            record: MetadataRecord {
                category: row.get(6)?,
                temporal_tags: row.get(7)?,
                symbolic_tags: row.get(8)?,
                associative_links: row.get(9)?,
                access_pattern: row.get(10)?,
                narrative_role: row.get(11)?,
            },
        })
    }

    fn into_fragment(self) -> Result<Fragment> {
        let content = codec::decode_content(&self.payload)?;

        Ok(Fragment {
            id: FragmentId::from_string(self.id),
            content,
            fragment_type: FragmentType::from_code(self.fragment_type)?,
            confidence_score: self.confidence_score,
            temporal_tags: self.record.temporal_tags()?,
            symbolic_tags: self.record.symbolic_tags()?,
            associative_links: self.record.associative_links()?,
            access_pattern: self.record.access_pattern()?,
            narrative_role: self.record.narrative_role,
            created_at: micros_to_datetime(self.created_at)?,
            last_evolved: micros_to_datetime(self.last_evolved)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use crate::error::StoreError;
    use chrono::Duration;

    fn create_test_store() -> FragmentStore {
        FragmentStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_commit_and_get_roundtrip() {
        let store = create_test_store();
        let fragment = Fragment::new("Bought oat milk", "errands")
            .with_type(FragmentType::Procedural)
            .with_confidence(0.6)
            .with_tag("shopping")
            .with_narrative_role("chore");

        let report = store.batch_commit(std::slice::from_ref(&fragment)).unwrap();
        assert_eq!(report.inserted, 1);

        let loaded = store.get_fragment(&fragment.id).unwrap().unwrap();
        assert_eq!(loaded, fragment);
    }

    #[test]
    fn test_get_missing() {
        let store = create_test_store();
        assert!(
            store
                .get_fragment(&FragmentId::from("frag-0-missing"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_empty_batch() {
        let store = create_test_store();
        assert_eq!(store.batch_commit(&[]).unwrap(), CommitReport::default());
    }

    #[test]
    fn test_replayed_batch_is_skipped() {
        let store = create_test_store();
        let batch: Vec<_> = (0..5)
            .map(|i| Fragment::new(format!("note {}", i), "notes"))
            .collect();

        assert_eq!(store.batch_commit(&batch).unwrap().inserted, 5);
        let replay = store.batch_commit(&batch).unwrap();
        assert_eq!(replay.inserted, 0);
        assert_eq!(replay.skipped, 5);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn test_batch_rolls_back_on_failure() {
        let store = create_test_store();
        let mut batch: Vec<_> = (0..3)
            .map(|i| Fragment::new(format!("note {}", i), "notes"))
            .collect();
        // Bypasses enqueue validation; rejected by the CHECK constraint.
        batch.insert(2, Fragment::new("bad", "notes").with_confidence(1.5));

        let err = store.batch_commit(&batch).unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.get_fragment(&batch[0].id).unwrap().is_none());
    }

    #[test]
    fn test_update_metadata() {
        let store = create_test_store();
        let fragment = Fragment::new("Ran 5k", "fitness");
        let other = Fragment::new("Ran 10k", "fitness");
        store
            .batch_commit(&[fragment.clone(), other.clone()])
            .unwrap();

        let evolved = fragment.created_at + Duration::seconds(5);
        let update = MetadataUpdate::new(fragment.id.clone(), evolved)
            .with_tags(["cluster:fitness".to_string()])
            .with_links([other.id.clone()]);
        assert!(store.update_metadata(&update).unwrap());

        let loaded = store.get_fragment(&fragment.id).unwrap().unwrap();
        assert!(loaded.symbolic_tags.contains("cluster:fitness"));
        assert_eq!(loaded.associative_links, vec![other.id]);
        assert_eq!(loaded.last_evolved, evolved);
        assert_eq!(loaded.created_at, fragment.created_at);
        assert_eq!(loaded.content, fragment.content);

        // Nothing new: no write, `last_evolved` stays put.
        let again = MetadataUpdate {
            last_evolved: evolved + Duration::seconds(5),
            ..update
        };
        assert!(!store.update_metadata(&again).unwrap());
        let reloaded = store.get_fragment(&fragment.id).unwrap().unwrap();
        assert_eq!(reloaded.last_evolved, evolved);
    }

    #[test]
    fn test_update_metadata_unions_with_stored_sets() {
        let store = create_test_store();
        let fragment = Fragment::new("Watered the basil", "garden").with_tag("user:herbs");
        let a = Fragment::new("Bought seeds", "garden");
        let b = Fragment::new("Repotted mint", "garden");
        store
            .batch_commit(&[fragment.clone(), a.clone(), b.clone()])
            .unwrap();

        // Both writers built their update from the same, older view of the
        // fragment; the second must not erase the first.
        let now = fragment.created_at + Duration::seconds(1);
        let first = MetadataUpdate::new(fragment.id.clone(), now)
            .with_tags(["period:morning".to_string()])
            .with_links([a.id.clone()]);
        let second = MetadataUpdate::new(fragment.id.clone(), now)
            .with_tags(["kw:basil".to_string()])
            .with_links([b.id.clone(), a.id.clone()]);
        assert!(store.update_metadata(&first).unwrap());
        assert!(store.update_metadata(&second).unwrap());

        let loaded = store.get_fragment(&fragment.id).unwrap().unwrap();
        let tags: Vec<_> = loaded.symbolic_tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["kw:basil", "period:morning", "user:herbs"]);
        assert_eq!(loaded.associative_links, vec![a.id, b.id]);
    }

    #[test]
    fn test_update_metadata_respects_caps_against_stored_sets() {
        let store = create_test_store();
        let fragment = Fragment::new("hub", "busy").with_tag("one");
        store.batch_commit(std::slice::from_ref(&fragment)).unwrap();

        let update = MetadataUpdate::new(fragment.id.clone(), fragment.created_at)
            .with_tags(["two".to_string(), "three".to_string()])
            .with_caps(4, 2);
        assert!(store.update_metadata(&update).unwrap());

        let loaded = store.get_fragment(&fragment.id).unwrap().unwrap();
        assert_eq!(loaded.symbolic_tags.len(), 2);
        assert!(loaded.symbolic_tags.contains("one"));
        assert!(loaded.symbolic_tags.contains("two"));
    }

    #[test]
    fn test_update_metadata_unknown_id() {
        let store = create_test_store();
        let update = MetadataUpdate::new(FragmentId::from("frag-0-nothing"), chrono::Utc::now())
            .with_tags(["orphan".to_string()]);
        assert!(!store.update_metadata(&update).unwrap());
    }

    #[test]
    fn test_touch_increments_access_count() {
        let store = create_test_store();
        let fragment = Fragment::new("Called mom", "family");
        store.batch_commit(std::slice::from_ref(&fragment)).unwrap();

        assert!(store.touch(&fragment.id).unwrap());
        assert!(store.touch(&fragment.id).unwrap());
        assert!(!store.touch(&FragmentId::from("frag-0-none")).unwrap());

        let loaded = store.get_fragment(&fragment.id).unwrap().unwrap();
        assert_eq!(loaded.access_pattern.access_count, 2);
    }

    #[test]
    fn test_corrupt_payload_surfaces_codec_error() {
        let store = create_test_store();
        let fragment = Fragment::new("soon corrupt", "notes");
        store.batch_commit(std::slice::from_ref(&fragment)).unwrap();

        store
            .writer
            .lock()
            .execute(
                "UPDATE fragments SET payload = X'52434647FF00' WHERE id = ?1",
                params![fragment.id.as_str()],
            )
            .unwrap();

        let err = store.get_fragment(&fragment.id).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Codec(CodecError::VersionMismatch { found: 0xFF, .. })
        ));
    }
}
