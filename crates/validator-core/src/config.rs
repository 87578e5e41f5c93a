//! Evaluation settings, loadable from YAML and overridable from the environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::client::ClientSettings;
use crate::model::{ImageFormat, RenderOptions};

pub const DEFAULT_VALIDATOR_URL: &str = "http://localhost:5173/validator.html";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Page hosting the validator bridge.
    pub validator_url: String,
    /// Number of concurrent renderer sessions.
    pub pool_size: usize,
    pub headless: bool,
    /// Per-command deadline for the browser session.
    pub timeout_ms: u64,
    pub save_screenshots: bool,
    pub screenshot_dir: PathBuf,
    pub image: ImageConfig,
    pub log_errors: bool,
    pub error_log_dir: PathBuf,
    /// Overrides Chrome auto-detection.
    pub chrome_executable: Option<PathBuf>,
    pub server: ServerConfig,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            validator_url: DEFAULT_VALIDATOR_URL.to_string(),
            pool_size: 5,
            headless: true,
            timeout_ms: 15_000,
            save_screenshots: true,
            screenshot_dir: PathBuf::from("outputs/screenshots"),
            image: ImageConfig::default(),
            log_errors: true,
            error_log_dir: PathBuf::from("outputs/errors"),
            chrome_executable: None,
            server: ServerConfig::default(),
        }
    }
}

impl EvalConfig {
    /// Image options for the bridge; `None` when nothing is going to be saved.
    pub fn render_options(&self) -> Option<RenderOptions> {
        self.save_screenshots.then(|| self.image.to_render_options())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            save_screenshots: self.save_screenshots,
            log_errors: self.log_errors,
            screenshot_dir: self.screenshot_dir.clone(),
            error_log_dir: self.error_log_dir.clone(),
            render_options: self.render_options(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub format: ImageFormat,
    pub background: bool,
    pub pixel_ratio: f64,
    pub padding: f64,
    pub quality: Option<f64>,
    pub dark_mode: Option<bool>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            background: true,
            pixel_ratio: 2.0,
            padding: 32.0,
            quality: None,
            dark_mode: None,
        }
    }
}

impl ImageConfig {
    pub fn to_render_options(&self) -> RenderOptions {
        RenderOptions {
            format: Some(self.format),
            background: Some(self.background),
            pixel_ratio: Some(self.pixel_ratio),
            padding: Some(self.padding),
            quality: self.quality,
            dark_mode: self.dark_mode,
        }
    }
}

/// Local dev server that hosts the validator page.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory containing the renderer's `package.json`.
    pub agent_dir: PathBuf,
    pub startup_timeout_ms: u64,
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            agent_dir: PathBuf::from("agent"),
            startup_timeout_ms: 60_000,
            log_dir: PathBuf::from("outputs/validator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: EvalConfig = serde_yaml::from_str(
            "pool_size: 2\nimage:\n  pixel_ratio: 1.5\nserver:\n  agent_dir: ./renderer\n",
        )
        .expect("yaml");
        assert_eq!(cfg.pool_size, 2);
        assert_eq!(cfg.validator_url, DEFAULT_VALIDATOR_URL);
        assert_eq!(cfg.image.pixel_ratio, 1.5);
        assert_eq!(cfg.image.padding, 32.0);
        assert_eq!(cfg.server.agent_dir, PathBuf::from("./renderer"));
        assert_eq!(cfg.server.startup_timeout_ms, 60_000);
    }

    #[test]
    fn render_options_mirror_image_settings() {
        let options = EvalConfig::default().render_options().expect("options");
        assert_eq!(options.format, Some(ImageFormat::Png));
        assert_eq!(options.background, Some(true));
        assert_eq!(options.pixel_ratio, Some(2.0));
        assert_eq!(options.quality, None);

        let quiet = EvalConfig {
            save_screenshots: false,
            ..EvalConfig::default()
        };
        assert!(quiet.render_options().is_none());
    }
}
