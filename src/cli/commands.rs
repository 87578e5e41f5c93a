use clap::Subcommand;

use super::fetch::FetchArgs;
use super::prompts::PromptsArgs;
use super::score::{ScoreArgs, ScoreBatchArgs};

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Score one completion against the renderer
    Score(ScoreArgs),

    /// Score a JSONL file of prompt/completion pairs concurrently
    ScoreBatch(ScoreBatchArgs),

    /// Print the system prompt published by the validator bridge
    SystemPrompt(FetchArgs),

    /// Print the JSON schema of the expected response
    Schema(FetchArgs),

    /// List evaluation prompts (built-in examples or a prompt file)
    Prompts(PromptsArgs),
}
