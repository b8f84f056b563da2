//! Index-backed scans returning fragment summaries.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Row, params};

use crate::error::Result;
use crate::types::{FragmentId, FragmentType};

use super::query::FragmentSummary;
use super::{FragmentStore, micros_to_datetime};

const SUMMARY_COLUMNS: &str =
    "f.id, f.fragment_type, f.confidence_score, m.category, f.created_at";

/// Raw summary columns; decoded once the statement is finished.
type SummaryRow = (String, i64, f64, String, i64);

fn summary_row(row: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn into_summary(
    (id, fragment_type, confidence_score, category, created_at): SummaryRow,
) -> Result<FragmentSummary> {
    Ok(FragmentSummary {
        id: FragmentId::from_string(id),
        fragment_type: FragmentType::from_code(fragment_type)?,
        confidence_score,
        category,
        created_at: micros_to_datetime(created_at)?,
    })
}

impl FragmentStore {
    /// Number of committed fragments.
    pub fn count(&self) -> Result<usize> {
        self.with_reader(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Most recently created fragments, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<FragmentSummary>> {
        let sql = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM fragments f JOIN fragment_metadata m ON m.id = f.id
            ORDER BY f.created_at DESC, f.id DESC
            LIMIT ?1
            "#
        );
        self.scan(&sql, params![limit as i64])
    }

    /// Fragments created in `[from, to]`, oldest first.
    pub fn created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>> {
        let sql = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM fragments f JOIN fragment_metadata m ON m.id = f.id
            WHERE f.created_at >= ?1 AND f.created_at <= ?2
            ORDER BY f.created_at ASC, f.id ASC
            LIMIT ?3
            "#
        );
        self.scan(
            &sql,
            params![from.timestamp_micros(), to.timestamp_micros(), limit as i64],
        )
    }

    /// Up to `limit` fragments created within `window` of `at`, nearest
    /// first, excluding one id. Ties in distance are broken by id.
    ///
    /// Two index scans walk outwards from `at`, one per direction, so a
    /// crowded window costs at most `2 * limit` rows.
    pub fn created_near(
        &self,
        at: DateTime<Utc>,
        window: TimeDelta,
        exclude: &FragmentId,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let centre = at.timestamp_micros();
        let from = at
            .checked_sub_signed(window)
            .map_or(i64::MIN, |t| t.timestamp_micros());
        let to = at
            .checked_add_signed(window)
            .map_or(i64::MAX, |t| t.timestamp_micros());

        let before = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM fragments f JOIN fragment_metadata m ON m.id = f.id
            WHERE f.created_at <= ?1 AND f.created_at >= ?2 AND f.id != ?3
            ORDER BY f.created_at DESC, f.id ASC
            LIMIT ?4
            "#
        );
        let after = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM fragments f JOIN fragment_metadata m ON m.id = f.id
            WHERE f.created_at > ?1 AND f.created_at <= ?2 AND f.id != ?3
            ORDER BY f.created_at ASC, f.id ASC
            LIMIT ?4
            "#
        );

        let mut near = self.scan(&before, params![centre, from, exclude.as_str(), limit as i64])?;
        near.extend(self.scan(&after, params![centre, to, exclude.as_str(), limit as i64])?);
        near.sort_by(|a, b| {
            let da = (a.created_at - at).abs();
            let db = (b.created_at - at).abs();
            da.cmp(&db).then_with(|| a.id.cmp(&b.id))
        });
        near.truncate(limit);
        Ok(near)
    }

    /// Fragments of one type with at least `min_confidence`, most confident first.
    pub fn by_type(
        &self,
        fragment_type: FragmentType,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>> {
        let sql = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM fragments f JOIN fragment_metadata m ON m.id = f.id
            WHERE f.fragment_type = ?1 AND f.confidence_score >= ?2
            ORDER BY f.confidence_score DESC, f.created_at DESC
            LIMIT ?3
            "#
        );
        self.scan(
            &sql,
            params![fragment_type.code(), min_confidence, limit as i64],
        )
    }

    /// Most recent fragments in a category, excluding one id.
    pub fn by_category(
        &self,
        category: &str,
        exclude: &FragmentId,
        limit: usize,
    ) -> Result<Vec<FragmentSummary>> {
        let sql = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM fragment_metadata m JOIN fragments f ON f.id = m.id
            WHERE m.category = ?1 AND m.id != ?2
            ORDER BY f.created_at DESC, f.id DESC
            LIMIT ?3
            "#
        );
        self.scan(&sql, params![category, exclude.as_str(), limit as i64])
    }

    fn scan(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<FragmentSummary>> {
        let rows = self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt
                .query_map(params, summary_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(into_summary).collect()
    }
}
