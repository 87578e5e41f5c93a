use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use validator_core::{fetch_response_schema, fetch_system_prompt};

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct FetchArgs {
    /// Write to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

pub async fn cmd_system_prompt(args: FetchArgs, ctx: &CliContext) -> Result<()> {
    ctx.server().await?;
    let prompt = fetch_system_prompt(&ctx.bridge_config()).await?;
    emit(args.out.as_deref(), &prompt).await
}

pub async fn cmd_schema(args: FetchArgs, ctx: &CliContext) -> Result<()> {
    ctx.server().await?;
    let schema = fetch_response_schema(&ctx.bridge_config()).await?;
    emit(args.out.as_deref(), &serde_json::to_string_pretty(&schema)?).await
}

async fn emit(out: Option<&Path>, body: &str) -> Result<()> {
    match out {
        Some(path) => {
            tokio::fs::write(path, body)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = body.len(), "saved");
        }
        None => println!("{body}"),
    }
    Ok(())
}
