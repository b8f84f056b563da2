//! Recent command - list the newest fragments.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use recollect_store::FragmentType;

use super::{Context, truncate};

/// Arguments for the recent command.
#[derive(Args, Debug)]
pub struct RecentArgs {
    /// Number of fragments to show
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Only fragments of this type
    #[arg(short = 't', long = "type")]
    pub fragment_type: Option<FragmentType>,

    /// Minimum confidence (with --type)
    #[arg(long, default_value = "0.0")]
    pub min_confidence: f64,
}

/// Run the recent command.
pub fn run(args: RecentArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let summaries = match args.fragment_type {
        Some(fragment_type) => store.by_type(fragment_type, args.min_confidence, args.limit)?,
        None => store.recent(args.limit)?,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    if summaries.is_empty() {
        println!("{}", dim.apply_to("No fragments stored"));
        return Ok(());
    }

    println!("{}", style("Recent Fragments").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();

    for (i, summary) in summaries.iter().enumerate() {
        let body = store
            .get_fragment(&summary.id)?
            .map(|f| truncate(&f.content.body, 60))
            .unwrap_or_default();
        println!("{}. {}", style(i + 1).cyan(), body);
        println!(
            "   {}",
            dim.apply_to(format!(
                "{} | {} | {} | {:.2}",
                summary.id,
                summary.category,
                summary.fragment_type,
                summary.confidence_score
            ))
        );
    }
    println!();

    Ok(())
}
