use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;
use super::output::OutputFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    pub output: OutputFormat,

    /// Launch the renderer dev server if the validator URL is local and not answering
    #[arg(long)]
    pub ensure_server: bool,

    /// Renderer project directory used by --ensure-server
    #[arg(long, value_name = "DIR")]
    pub agent_dir: Option<PathBuf>,

    /// Validator page URL
    #[arg(long, value_name = "URL")]
    pub validator_url: Option<String>,

    /// Number of concurrent renderer sessions
    #[arg(long)]
    pub pool_size: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}
