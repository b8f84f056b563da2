//! Show command - display one fragment.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use recollect_store::FragmentId;

use super::Context;

/// Arguments for the show command.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Fragment id
    pub id: String,

    /// Do not count this read in the access counter
    #[arg(long)]
    pub no_touch: bool,
}

/// Run the show command.
pub fn run(args: ShowArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let id = FragmentId::from_string(args.id);

    if !args.no_touch {
        store.touch(&id)?;
    }
    let Some(fragment) = store.get_fragment(&id)? else {
        bail!("fragment not found: {}", id);
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&fragment)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(&fragment.id).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("{}", fragment.content.body);
    println!();
    println!("  {} {}", dim.apply_to("Category:  "), fragment.content.category);
    println!("  {} {}", dim.apply_to("Type:      "), fragment.fragment_type);
    println!(
        "  {} {:.2}",
        dim.apply_to("Confidence:"),
        fragment.confidence_score
    );
    println!("  {} {}", dim.apply_to("Role:      "), fragment.narrative_role);
    println!(
        "  {} {} ({} {}:00)",
        dim.apply_to("Created:   "),
        fragment.created_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
        fragment.temporal_tags.day_of_week,
        fragment.temporal_tags.hour
    );
    println!(
        "  {} {}",
        dim.apply_to("Evolved:   "),
        fragment.last_evolved.format("%Y-%m-%d %H:%M:%S%.3f UTC")
    );
    println!(
        "  {} {}",
        dim.apply_to("Accessed:  "),
        fragment.access_pattern.access_count
    );

    if !fragment.symbolic_tags.is_empty() {
        println!();
        println!("{}", style("Tags").bold());
        for tag in &fragment.symbolic_tags {
            println!("  {}", style(tag).cyan());
        }
    }

    if !fragment.associative_links.is_empty() {
        println!();
        println!("{}", style("Links").bold());
        for link in &fragment.associative_links {
            println!("  {}", link);
        }
    }

    if ctx.verbose {
        println!();
        println!("  {}", dim.apply_to(format!("Database: {}", ctx.db.display())));
    }

    Ok(())
}
