use std::path::PathBuf;

use anyhow::{Context, Result};
use canvas_eval::dataset::{dedupe_prompts, example_prompts, load_prompts};
use canvas_eval::EvalEnvironment;
use clap::Args;
use tracing::info;

use super::context::CliContext;
use super::output::{render, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct PromptsArgs {
    /// Prompt file (.jsonl, .json, .csv or plain text); the built-in examples when omitted
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Field holding the prompt in JSON objects and CSV headers
    #[arg(long, default_value = "prompt")]
    pub field: String,

    /// Keep prompts that normalize to an earlier one
    #[arg(long)]
    pub keep_duplicates: bool,

    /// Emit chat rows with the renderer's system prompt (needs the validator page)
    #[arg(long)]
    pub chat: bool,
}

pub async fn cmd_prompts(args: PromptsArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let mut prompts = match &args.input {
        Some(path) => load_prompts(path, &args.field)
            .with_context(|| format!("Failed to load prompts from {}", path.display()))?,
        None => example_prompts(),
    };
    if !args.keep_duplicates {
        prompts = dedupe_prompts(prompts);
    }
    info!(count = prompts.len(), "loaded prompts");

    if args.chat {
        let server = ctx.server().await?;
        let config = ctx.config().clone();
        let environment =
            tokio::task::spawn_blocking(move || EvalEnvironment::load_with(&config, prompts, server))
                .await??;
        return match format {
            OutputFormat::Human => {
                for row in &environment.rows {
                    println!("{}", serde_json::to_string(row)?);
                }
                Ok(())
            }
            _ => {
                println!("{}", render(format, &environment.rows)?);
                Ok(())
            }
        };
    }

    match format {
        OutputFormat::Human => {
            for prompt in &prompts {
                println!("{prompt}");
            }
        }
        _ => println!("{}", render(format, &prompts)?),
    }
    Ok(())
}
