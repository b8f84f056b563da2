//! Remember command - store a single fragment.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use recollect_store::{FragmentInput, FragmentType};
use serde::Serialize;

use super::{Context, finish};

/// Arguments for the remember command.
#[derive(Args, Debug)]
pub struct RememberArgs {
    /// Fragment content
    pub content: String,

    /// Category label
    #[arg(short, long, default_value = "general")]
    pub category: String,

    /// Fragment type (episodic, semantic, procedural, reflective)
    #[arg(short = 't', long = "type", default_value = "episodic")]
    pub fragment_type: FragmentType,

    /// Confidence in [0.0, 1.0]
    #[arg(long, default_value = "1.0")]
    pub confidence: f64,

    /// Initial tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Narrative role
    #[arg(long, default_value = "observation")]
    pub role: String,
}

#[derive(Debug, Serialize)]
struct RememberOutput {
    id: String,
    committed: u64,
}

/// Run the remember command.
pub async fn run(args: RememberArgs, ctx: &Context) -> Result<()> {
    let mut input = FragmentInput::new(args.content, args.category)
        .with_type(args.fragment_type)
        .with_confidence(args.confidence)
        .with_narrative_role(args.role);
    for tag in args.tags {
        input = input.with_tag(tag);
    }

    let engine = ctx.open_engine()?;
    let id = match engine.store(input) {
        Ok(id) => id,
        Err(e) => {
            engine.shutdown().await?;
            return Err(e.into());
        }
    };
    let metrics = finish(&engine, ctx).await?;

    if ctx.json_output {
        let output = RememberOutput {
            id: id.to_string(),
            committed: metrics.fragments_committed,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green();
        println!("{} {}", green.apply_to("Remembered"), style(&id).cyan());
    }

    Ok(())
}
