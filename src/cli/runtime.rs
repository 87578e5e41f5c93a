use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator_core::EvalConfig;

use super::env::CliArgs;

const ENV_PREFIX: &str = "CANVAS_EVAL_";

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

pub struct LoadedConfig {
    pub config: EvalConfig,
    pub path: PathBuf,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .context("Failed to read config file")?;

        let config: EvalConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded configuration from: {}", config_path.display());
        Ok(LoadedConfig {
            config,
            path: config_path,
        })
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        Ok(LoadedConfig {
            config: EvalConfig::default(),
            path: config_path,
        })
    }
}

// ./config/config.yaml > ~/.config/canvas-eval/config.yaml
fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("config/config.yaml");
    if local_config.exists() {
        return local_config;
    }
    match dirs::config_dir() {
        Some(mut path) => {
            path.push("canvas-eval");
            path.push("config.yaml");
            path
        }
        None => local_config,
    }
}

/// Apply `CANVAS_EVAL_*` variables on top of the file configuration.
pub fn apply_env_overrides(config: &mut EvalConfig) {
    if let Some(url) = env_value("VALIDATOR_URL") {
        config.validator_url = url;
    }
    if let Some(size) = env_parsed::<usize>("POOL_SIZE") {
        config.pool_size = size;
    }
    if let Some(headless) = env_flag("HEADLESS") {
        config.headless = headless;
    }
    if let Some(save) = env_flag("SAVE_SCREENSHOTS") {
        config.save_screenshots = save;
    }
    if let Some(log) = env_flag("LOG_ERRORS") {
        config.log_errors = log;
    }
}

pub fn apply_cli_overrides(config: &mut EvalConfig, cli: &CliArgs) {
    if let Some(url) = &cli.validator_url {
        config.validator_url = url.clone();
    }
    if let Some(size) = cli.pool_size {
        config.pool_size = size;
    }
    if let Some(dir) = &cli.agent_dir {
        config.server.agent_dir = dir.clone();
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_value(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = %format!("{ENV_PREFIX}{name}"), value = %raw, "ignoring unparsable override");
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = env_value(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(var = %format!("{ENV_PREFIX}{name}"), value = %raw, "ignoring unparsable override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use tempfile::tempdir;

    fn clear_env() {
        for name in [
            "VALIDATOR_URL",
            "POOL_SIZE",
            "HEADLESS",
            "SAVE_SCREENSHOTS",
            "LOG_ERRORS",
        ] {
            env::remove_var(format!("{ENV_PREFIX}{name}"));
        }
    }

    #[tokio::test]
    async fn explicit_config_file_is_parsed() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("eval.yaml");
        std::fs::write(&path, "pool_size: 2\nheadless: false\n").unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.pool_size, 2);
        assert!(!loaded.config.headless);
        assert!(loaded.config.save_screenshots);
    }

    #[tokio::test]
    async fn missing_config_file_falls_back_to_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("absent.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.config.pool_size, EvalConfig::default().pool_size);
    }

    #[tokio::test]
    async fn malformed_config_file_is_an_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "pool_size: [nope").unwrap();
        assert!(load_config(Some(&path)).await.is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_replace_file_values() {
        clear_env();
        env::set_var("CANVAS_EVAL_VALIDATOR_URL", "http://renderer:9000/validator.html");
        env::set_var("CANVAS_EVAL_POOL_SIZE", "8");
        env::set_var("CANVAS_EVAL_HEADLESS", "false");
        env::set_var("CANVAS_EVAL_SAVE_SCREENSHOTS", "0");

        let mut config = EvalConfig::default();
        apply_env_overrides(&mut config);
        clear_env();

        assert_eq!(config.validator_url, "http://renderer:9000/validator.html");
        assert_eq!(config.pool_size, 8);
        assert!(!config.headless);
        assert!(!config.save_screenshots);
        assert!(config.log_errors);
    }

    #[test]
    #[serial]
    fn unparsable_env_values_are_ignored() {
        clear_env();
        env::set_var("CANVAS_EVAL_POOL_SIZE", "many");
        env::set_var("CANVAS_EVAL_LOG_ERRORS", "maybe");

        let mut config = EvalConfig::default();
        apply_env_overrides(&mut config);
        clear_env();

        assert_eq!(config.pool_size, 5);
        assert!(config.log_errors);
    }

    #[test]
    fn cli_flags_win_over_config() {
        let cli = CliArgs::parse_from([
            "canvas-eval",
            "--pool-size",
            "3",
            "--validator-url",
            "http://127.0.0.1:4000/validator.html",
            "--agent-dir",
            "renderer",
            "prompts",
        ]);
        let mut config = EvalConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.validator_url, "http://127.0.0.1:4000/validator.html");
        assert_eq!(config.server.agent_dir, PathBuf::from("renderer"));
    }
}
