//! Bench command - concurrent enqueue throughput.

use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use recollect_engine::{EngineConfig, EnrichmentOptions, FragmentEngine, MetricsSnapshot};
use recollect_store::FragmentInput;
use serde::Serialize;

use super::Context;

const CATEGORIES: [&str; 4] = ["work", "home", "health", "reading"];

/// Arguments for the bench command.
#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Total fragments to store
    #[arg(short = 'n', long, default_value = "10000")]
    pub count: usize,

    /// Concurrent producer tasks
    #[arg(short, long, default_value = "8")]
    pub producers: usize,

    /// Write to the configured database instead of an in-memory store
    #[arg(long)]
    pub persist: bool,

    /// Disable enrichment during the run
    #[arg(long)]
    pub no_enrich: bool,
}

#[derive(Debug, Serialize)]
struct BenchOutput {
    fragments: usize,
    producers: usize,
    enqueue_ms: f64,
    enqueue_per_sec: f64,
    durable_ms: f64,
    stored: usize,
    metrics: MetricsSnapshot,
}

/// Run the bench command.
pub async fn run(args: BenchArgs, ctx: &Context) -> Result<()> {
    let mut config = EngineConfig::from(&ctx.config);
    if args.no_enrich {
        config = config.with_enrichment(EnrichmentOptions::disabled());
    }
    let engine = if args.persist {
        ctx.open_engine_with(config)?
    } else {
        FragmentEngine::open_in_memory(config)?
    };

    let producers = args.producers.max(1);
    let per_producer = args.count.div_ceil(producers);

    let started = Instant::now();
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let engine = engine.clone();
            let quota = per_producer.min(args.count.saturating_sub(p * per_producer));
            tokio::spawn(async move {
                for i in 0..quota {
                    let category = CATEGORIES[(p + i) % CATEGORIES.len()];
                    engine.store(FragmentInput::new(
                        format!("bench fragment {} from producer {}", i, p),
                        category,
                    ))?;
                    if i % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                Ok::<_, recollect_engine::EngineError>(())
            })
        })
        .collect();
    for handle in handles {
        handle.await.context("producer task panicked")??;
    }
    let enqueue = started.elapsed();

    engine.force_flush_all().await?;
    let durable = started.elapsed();
    let stored = engine.count()?;

    if !args.no_enrich {
        engine.wait_for_enrichment(Duration::from_secs(30)).await;
    }
    let metrics = engine.get_metrics();
    engine.shutdown().await?;

    let output = BenchOutput {
        fragments: args.count,
        producers,
        enqueue_ms: millis(enqueue),
        enqueue_per_sec: args.count as f64 / enqueue.as_secs_f64().max(f64::EPSILON),
        durable_ms: millis(durable),
        stored,
        metrics,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&output);
    }

    Ok(())
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

fn print_report(output: &BenchOutput) {
    let dim = Style::new().dim();
    let m = &output.metrics;

    println!("{}", style("Enqueue Benchmark").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!(
        "  Fragments:     {} from {} producers",
        style(output.fragments).cyan(),
        output.producers
    );
    println!(
        "  Enqueue:       {:.1} ms ({} /s)",
        output.enqueue_ms,
        style(format!("{:.0}", output.enqueue_per_sec)).green()
    );
    println!("  Durable after: {:.1} ms", output.durable_ms);
    println!("  Stored:        {}", output.stored);
    println!();

    println!("{}", style("Flushes").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Batches:       {}", m.batches_flushed);
    println!("  Committed:     {}", m.fragments_committed);
    println!(
        "  Latency:       {:.2} ms avg, {:.2} ms last",
        m.avg_flush_latency_ms, m.last_flush_latency_ms
    );
    println!("  Failures:      {} ({} retries)", m.commit_failures, m.retries);
    println!();

    println!("{}", style("Enrichment").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!(
        "  Completed:     {} of {} scheduled",
        m.enrichment_completed, m.enrichment_scheduled
    );
    println!("  Dropped:       {}", m.dropped_enrichments);
    println!(
        "  Task time:     {:.2} / {:.2} / {:.2} ms (cluster / timeline / tags)",
        m.avg_clustering_ms, m.avg_timeline_ms, m.avg_tagging_ms
    );
    println!();
}
