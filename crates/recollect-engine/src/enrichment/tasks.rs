//! The three enrichment tasks.
//!
//! Each task reads the fragment back from the store, works out which tags and
//! links it wants to add and hands them to a single `update_metadata` call.
//! The store merges them into the current sets (deduplicated and capped)
//! inside its write transaction, so tasks running concurrently on the same
//! fragment never drop each other's additions. A task that finds nothing new
//! writes nothing, so repeated runs converge.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{SubsecRound, TimeDelta, Utc};
use recollect_store::{Fragment, FragmentBackend, FragmentId, MetadataUpdate, StoreError};

use super::TaskKind;
use crate::config::EnrichmentOptions;
use crate::error::EnrichmentTaskError;

/// Keyword tags added by tag enhancement.
const MAX_KEYWORDS: usize = 3;

/// Shortest word considered a keyword.
const MIN_KEYWORD_LEN: usize = 5;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "because", "before", "being", "below",
    "between", "could", "doing", "during", "every", "further", "might", "other", "really",
    "should", "still", "their", "there", "these", "thing", "things", "those", "through",
    "under", "until", "where", "which", "while", "would", "yours",
];

/// Tags and links a task wants to add.
#[derive(Debug, Default)]
struct Additions {
    tags: Vec<String>,
    links: Vec<FragmentId>,
}

/// Run one task against one fragment.
///
/// Returns `true` when the fragment's metadata changed.
pub fn run_task(
    kind: TaskKind,
    backend: &dyn FragmentBackend,
    id: &FragmentId,
    options: &EnrichmentOptions,
) -> Result<bool, EnrichmentTaskError> {
    let store_err = |source: StoreError| EnrichmentTaskError::Store {
        task: kind,
        id: id.clone(),
        source,
    };

    let fragment = backend
        .get(id)
        .map_err(store_err)?
        .ok_or_else(|| EnrichmentTaskError::NotFound {
            task: kind,
            id: id.clone(),
        })?;

    let additions = match kind {
        TaskKind::ConceptClustering => concept_clustering(backend, &fragment, options),
        TaskKind::TimelineIntegration => timeline_integration(backend, &fragment, options),
        TaskKind::TagEnhancement => Ok(tag_enhancement(&fragment)),
    }
    .map_err(store_err)?;

    let update = MetadataUpdate::new(fragment.id.clone(), Utc::now().trunc_subsecs(6))
        .with_tags(additions.tags)
        .with_links(additions.links)
        .with_caps(options.max_links, options.max_tags);
    backend.update_metadata(&update).map_err(store_err)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────────────────

fn concept_clustering(
    backend: &dyn FragmentBackend,
    fragment: &Fragment,
    options: &EnrichmentOptions,
) -> Result<Additions, StoreError> {
    let peers = backend.by_category(fragment.category(), &fragment.id, options.cluster_fanout)?;

    Ok(Additions {
        tags: vec![format!("cluster:{}", fragment.category())],
        links: peers.into_iter().map(|s| s.id).collect(),
    })
}

fn timeline_integration(
    backend: &dyn FragmentBackend,
    fragment: &Fragment,
    options: &EnrichmentOptions,
) -> Result<Additions, StoreError> {
    let window = TimeDelta::from_std(options.timeline_window).unwrap_or(TimeDelta::days(365));
    let neighbours = backend.created_near(
        fragment.created_at,
        window,
        &fragment.id,
        options.timeline_fanout,
    )?;

    Ok(Additions {
        tags: vec![format!("period:{}", period_of_day(fragment.temporal_tags.hour))],
        links: neighbours.into_iter().map(|s| s.id).collect(),
    })
}

fn tag_enhancement(fragment: &Fragment) -> Additions {
    let mut tags: Vec<String> = keywords(&fragment.content.body)
        .into_iter()
        .map(|word| format!("kw:{}", word))
        .collect();
    tags.push(format!(
        "confidence:{}",
        confidence_band(fragment.confidence_score)
    ));
    tags.push(format!("type:{}", fragment.fragment_type));

    Additions {
        tags,
        links: Vec::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Most frequent content words, ties broken alphabetically.
pub(crate) fn keywords(body: &str) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in body
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(&w.as_str()))
    {
        *counts.entry(word).or_default() += 1;
    }

    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|(wa, ca), (wb, cb)| Reverse(ca).cmp(&Reverse(cb)).then_with(|| wa.cmp(wb)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(word, _)| word)
        .collect()
}

pub(crate) fn period_of_day(hour: u32) -> &'static str {
    match hour {
        0..=5 => "night",
        6..=11 => "morning",
        12..=17 => "afternoon",
        _ => "evening",
    }
}

pub(crate) fn confidence_band(score: f64) -> &'static str {
    if score < 0.4 {
        "low"
    } else if score < 0.75 {
        "medium"
    } else {
        "high"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use recollect_store::{CommitReport, FragmentStore, FragmentSummary, FragmentType};

    fn store_with(fragments: &[Fragment]) -> FragmentStore {
        let store = FragmentStore::open_in_memory().unwrap();
        store.batch_commit(fragments).unwrap();
        store
    }

    /// Serves a fixed, possibly outdated copy of the fragment from `get`;
    /// everything else goes to the real store.
    struct StaleReads<'a> {
        store: &'a FragmentStore,
        snapshot: Fragment,
    }

    impl FragmentBackend for StaleReads<'_> {
        fn batch_commit(&self, fragments: &[Fragment]) -> recollect_store::Result<CommitReport> {
            self.store.batch_commit(fragments)
        }

        fn get(&self, _id: &FragmentId) -> recollect_store::Result<Option<Fragment>> {
            Ok(Some(self.snapshot.clone()))
        }

        fn update_metadata(&self, update: &MetadataUpdate) -> recollect_store::Result<bool> {
            self.store.update_metadata(update)
        }

        fn count(&self) -> recollect_store::Result<usize> {
            self.store.count()
        }

        fn by_category(
            &self,
            category: &str,
            exclude: &FragmentId,
            limit: usize,
        ) -> recollect_store::Result<Vec<FragmentSummary>> {
            self.store.by_category(category, exclude, limit)
        }

        fn created_near(
            &self,
            at: DateTime<Utc>,
            window: TimeDelta,
            exclude: &FragmentId,
            limit: usize,
        ) -> recollect_store::Result<Vec<FragmentSummary>> {
            self.store.created_near(at, window, exclude, limit)
        }
    }

    #[test]
    fn test_keywords() {
        let words = keywords("Garden garden GARDEN tomatoes tomatoes basil, watering! about about about");
        // Ties on count fall back to alphabetical order.
        assert_eq!(words, vec!["garden", "tomatoes", "basil"]);
        assert!(keywords("a b c tiny").is_empty());
    }

    #[test]
    fn test_bands() {
        assert_eq!(period_of_day(3), "night");
        assert_eq!(period_of_day(9), "morning");
        assert_eq!(period_of_day(12), "afternoon");
        assert_eq!(period_of_day(23), "evening");
        assert_eq!(confidence_band(0.1), "low");
        assert_eq!(confidence_band(0.5), "medium");
        assert_eq!(confidence_band(0.75), "high");
    }

    #[test]
    fn test_concept_clustering_links_same_category() {
        let a = Fragment::new("Standup notes", "work");
        let b = Fragment::new("Sprint review", "work");
        let c = Fragment::new("Dinner plans", "home");
        let store = store_with(&[a.clone(), b.clone(), c.clone()]);
        let options = EnrichmentOptions::default();

        assert!(run_task(TaskKind::ConceptClustering, &store, &a.id, &options).unwrap());

        let enriched = store.get_fragment(&a.id).unwrap().unwrap();
        assert_eq!(enriched.associative_links, vec![b.id]);
        assert!(enriched.symbolic_tags.contains("cluster:work"));
        assert!(enriched.last_evolved >= a.last_evolved);
    }

    #[test]
    fn test_timeline_integration_nearest_first() {
        let base = Utc::now().trunc_subsecs(6) - TimeDelta::hours(2);
        let mut fragments: Vec<Fragment> = [0i64, 10, 25, 50, 200]
            .iter()
            .map(|offset| {
                let mut f = Fragment::new(format!("event at +{}m", offset), "log");
                f.created_at = base + TimeDelta::minutes(*offset);
                f
            })
            .collect();
        fragments[0].temporal_tags.hour = 8;
        let store = store_with(&fragments);
        let options = EnrichmentOptions::default();

        run_task(TaskKind::TimelineIntegration, &store, &fragments[0].id, &options).unwrap();

        let enriched = store.get_fragment(&fragments[0].id).unwrap().unwrap();
        assert_eq!(
            enriched.associative_links,
            vec![
                fragments[1].id.clone(),
                fragments[2].id.clone(),
                fragments[3].id.clone()
            ]
        );
        assert!(enriched.symbolic_tags.contains("period:morning"));
    }

    #[test]
    fn test_timeline_integration_in_a_crowded_window() {
        let at = Utc::now().trunc_subsecs(6) - TimeDelta::hours(3);
        let mut fragments: Vec<Fragment> = (0..300)
            .map(|i| {
                let mut f = Fragment::new(format!("burst {}", i), "log");
                f.created_at = at - TimeDelta::minutes(50) + TimeDelta::milliseconds(i);
                f
            })
            .collect();
        let mut target = Fragment::new("target", "log");
        target.created_at = at;
        let mut close = Fragment::new("one second later", "log");
        close.created_at = at + TimeDelta::seconds(1);
        fragments.push(target.clone());
        fragments.push(close.clone());
        let store = store_with(&fragments);

        run_task(
            TaskKind::TimelineIntegration,
            &store,
            &target.id,
            &EnrichmentOptions::default(),
        )
        .unwrap();

        let enriched = store.get_fragment(&target.id).unwrap().unwrap();
        assert_eq!(
            enriched.associative_links,
            vec![
                close.id,
                fragments[299].id.clone(),
                fragments[298].id.clone()
            ]
        );
    }

    #[test]
    fn test_stale_read_keeps_concurrent_additions() {
        let mut fragment = Fragment::new("Pruned the apple trees before breakfast", "garden");
        fragment.temporal_tags.hour = 7;
        let store = store_with(std::slice::from_ref(&fragment));
        let options = EnrichmentOptions::default();

        // Another worker read the fragment before timeline integration wrote.
        let stale = StaleReads {
            store: &store,
            snapshot: store.get_fragment(&fragment.id).unwrap().unwrap(),
        };
        assert!(run_task(TaskKind::TimelineIntegration, &store, &fragment.id, &options).unwrap());
        assert!(run_task(TaskKind::TagEnhancement, &stale, &fragment.id, &options).unwrap());

        let tags = store.get_fragment(&fragment.id).unwrap().unwrap().symbolic_tags;
        assert!(tags.contains("period:morning"));
        assert!(tags.contains("kw:apple"));
        assert!(tags.contains("type:episodic"));
    }

    #[test]
    fn test_tag_enhancement() {
        let fragment = Fragment::new("Refactored the parser; parser tests pass", "code")
            .with_type(FragmentType::Procedural)
            .with_confidence(0.3);
        let store = store_with(std::slice::from_ref(&fragment));

        run_task(
            TaskKind::TagEnhancement,
            &store,
            &fragment.id,
            &EnrichmentOptions::default(),
        )
        .unwrap();

        let tags = store.get_fragment(&fragment.id).unwrap().unwrap().symbolic_tags;
        assert!(tags.contains("kw:parser"));
        assert!(tags.contains("kw:refactored"));
        assert!(tags.contains("confidence:low"));
        assert!(tags.contains("type:procedural"));
    }

    #[test]
    fn test_rerun_is_a_no_op() {
        let a = Fragment::new("Read a chapter of Dune", "books");
        let b = Fragment::new("Ordered the sequel", "books");
        let store = store_with(&[a.clone(), b]);
        let options = EnrichmentOptions::default();

        for kind in TaskKind::ALL {
            run_task(kind, &store, &a.id, &options).unwrap();
        }
        let once = store.get_fragment(&a.id).unwrap().unwrap();

        for kind in TaskKind::ALL {
            assert!(!run_task(kind, &store, &a.id, &options).unwrap());
        }
        let twice = store.get_fragment(&a.id).unwrap().unwrap();

        assert_eq!(once.symbolic_tags, twice.symbolic_tags);
        assert_eq!(once.associative_links, twice.associative_links);
        assert_eq!(once.last_evolved, twice.last_evolved);
    }

    #[test]
    fn test_caps_are_respected() {
        let mut fragments = vec![Fragment::new("hub", "busy")];
        for i in 0..10 {
            fragments.push(Fragment::new(format!("spoke {}", i), "busy"));
        }
        let store = store_with(&fragments);
        let options = EnrichmentOptions::default().with_caps(2, 1);

        run_task(TaskKind::ConceptClustering, &store, &fragments[0].id, &options).unwrap();
        run_task(TaskKind::TagEnhancement, &store, &fragments[0].id, &options).unwrap();

        let hub = store.get_fragment(&fragments[0].id).unwrap().unwrap();
        assert_eq!(hub.associative_links.len(), 2);
        assert_eq!(hub.symbolic_tags.len(), 1);
        assert!(!hub.associative_links.contains(&hub.id));
    }

    #[test]
    fn test_missing_fragment() {
        let store = FragmentStore::open_in_memory().unwrap();
        let err = run_task(
            TaskKind::TagEnhancement,
            &store,
            &FragmentId::from("frag-0-gone"),
            &EnrichmentOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EnrichmentTaskError::NotFound { .. }));
    }
}
