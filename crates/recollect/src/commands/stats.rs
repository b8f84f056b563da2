//! Stats command - store statistics.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::Context;

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {}

/// Run the stats command.
pub fn run(_args: StatsArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let stats = store.stats()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!("{}", style("Fragment Store").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Fragments:   {}", style(stats.fragment_count).cyan());
    println!("  Categories:  {}", style(stats.category_count).cyan());
    println!("  Linked:      {}", style(stats.linked_count).cyan());
    println!("  Oldest:      {}", fmt_time(stats.oldest));
    println!("  Newest:      {}", fmt_time(stats.newest));
    println!();
    println!(
        "  {}",
        dim.apply_to(format!(
            "Schema v{}, codec v{}, {}",
            stats.schema_version,
            stats.codec_version,
            ctx.db.display()
        ))
    );
    println!();

    Ok(())
}
