//! Ingest command - one fragment per line of a file.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use recollect_store::{FragmentInput, FragmentType};
use serde::Serialize;

use super::{Context, finish};

/// Arguments for the ingest command.
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// File to read, or `-` for stdin
    pub file: PathBuf,

    /// Category label for every fragment
    #[arg(short, long, default_value = "general")]
    pub category: String,

    /// Fragment type (episodic, semantic, procedural, reflective)
    #[arg(short = 't', long = "type", default_value = "episodic")]
    pub fragment_type: FragmentType,

    /// Lines handed to the engine per call
    #[arg(long, default_value = "500")]
    pub chunk: usize,
}

#[derive(Debug, Serialize)]
struct IngestOutput {
    lines: usize,
    committed: u64,
    batches: u64,
    elapsed_ms: u64,
}

/// Run the ingest command.
pub async fn run(args: IngestArgs, ctx: &Context) -> Result<()> {
    let text = read_input(&args.file)?;
    let inputs: Vec<FragmentInput> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| FragmentInput::new(line, &args.category).with_type(args.fragment_type))
        .collect();

    let started = Instant::now();
    let engine = ctx.open_engine()?;
    for chunk in inputs.chunks(args.chunk.max(1)) {
        if let Err(e) = engine.store_batch(chunk.to_vec()) {
            engine.shutdown().await?;
            return Err(e.into());
        }
    }
    let metrics = finish(&engine, ctx).await?;
    let elapsed = started.elapsed();

    if ctx.json_output {
        let output = IngestOutput {
            lines: inputs.len(),
            committed: metrics.fragments_committed,
            batches: metrics.batches_flushed,
            elapsed_ms: elapsed.as_millis() as u64,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let dim = Style::new().dim();
        println!(
            "Ingested {} fragments from {}",
            style(metrics.fragments_committed).cyan(),
            args.file.display()
        );
        println!(
            "{}",
            dim.apply_to(format!(
                "{} batches, {} enriched, {:.1?}",
                metrics.batches_flushed, metrics.enrichment_completed, elapsed
            ))
        );
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
