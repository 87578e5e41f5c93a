use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{apply_cli_overrides, apply_env_overrides, init_logging, load_config, LoadedConfig};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug)?;
    info!(
        git = env!("GIT_HASH"),
        built = env!("BUILD_DATE"),
        "Starting canvas-eval v{}",
        env!("CARGO_PKG_VERSION")
    );

    let LoadedConfig { mut config, path } = load_config(cli.config.as_ref()).await?;
    apply_env_overrides(&mut config);
    apply_cli_overrides(&mut config, &cli);
    let cli_context = CliContext::new(config, path, cli.ensure_server);

    let outcome = dispatch(&cli, &cli_context).await;
    cli_context.shutdown().await;

    match outcome {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
