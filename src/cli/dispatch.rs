use anyhow::Result;

use super::fetch::{cmd_schema, cmd_system_prompt};
use super::prompts::cmd_prompts;
use super::score::{cmd_score, cmd_score_batch};
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use crate::cli::env::CliArgs;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Score(args) => cmd_score(args, ctx, cli.output).await,
        Commands::ScoreBatch(args) => cmd_score_batch(args, ctx, cli.output).await,
        Commands::SystemPrompt(args) => cmd_system_prompt(args, ctx).await,
        Commands::Schema(args) => cmd_schema(args, ctx).await,
        Commands::Prompts(args) => cmd_prompts(args, ctx, cli.output).await,
    }
}
