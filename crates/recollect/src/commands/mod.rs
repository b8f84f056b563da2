//! CLI command handlers.

pub mod bench;
pub mod ingest;
pub mod recent;
pub mod remember;
pub mod show;
pub mod stats;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use console::Style;
use recollect_config::RecollectConfig;
use recollect_engine::{EngineConfig, FragmentEngine, MetricsSnapshot};
use recollect_store::{FragmentStore, StoreOptions};

/// How long write commands wait for enrichment before exiting.
const ENRICHMENT_GRACE: Duration = Duration::from_secs(10);

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Database file.
    pub db: PathBuf,
    /// Merged configuration.
    pub config: RecollectConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    fn store_options(&self) -> StoreOptions {
        let store = self.config.store_or_default();
        StoreOptions {
            cache_size_kib: store.cache_size_kib,
            busy_timeout: Duration::from_millis(store.busy_timeout_ms),
        }
    }

    /// Open the store directly, for read commands.
    pub fn open_store(&self) -> Result<FragmentStore> {
        FragmentStore::open_with_options(&self.db, &self.store_options())
            .with_context(|| format!("opening {}", self.db.display()))
    }

    /// Start the engine on the configured database.
    pub fn open_engine(&self) -> Result<FragmentEngine> {
        self.open_engine_with(EngineConfig::from(&self.config))
    }

    /// Start the engine with an explicit configuration.
    pub fn open_engine_with(&self, config: EngineConfig) -> Result<FragmentEngine> {
        FragmentEngine::open(&self.db, &self.store_options(), config)
            .with_context(|| format!("opening {}", self.db.display()))
    }
}

/// Flush, let enrichment catch up, and stop the engine.
///
/// Returns the metrics as they stood once everything was committed.
pub async fn finish(engine: &FragmentEngine, ctx: &Context) -> Result<MetricsSnapshot> {
    engine.force_flush_all().await?;
    if !engine.wait_for_enrichment(ENRICHMENT_GRACE).await && ctx.verbose {
        let dim = Style::new().dim();
        eprintln!("{}", dim.apply_to("Enrichment did not finish; some fragments stay unenriched"));
    }
    let metrics = engine.get_metrics();
    engine.shutdown().await?;
    Ok(metrics)
}

/// Shorten `s` to at most `max` characters.
pub fn truncate(s: &str, max: usize) -> String {
    let s = s.lines().next().unwrap_or("");
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer sentence here", 10), "a longe...");
        assert_eq!(truncate("first\nsecond", 20), "first");
    }
}
