use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use which::which;

const CHROME_ENV: &str = "CANVAS_EVAL_CHROME";
const SKIP_OS_PATHS_ENV: &str = "CANVAS_EVAL_SKIP_OS_PATHS";
const PROFILE_ENV: &str = "CANVAS_EVAL_CHROME_PROFILE";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdpConfig {
    /// Empty lets chromiumoxide search on its own.
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Deadline applied to every CDP command and to predicate polling.
    pub default_deadline_ms: u64,
    /// Connect to an already running browser instead of launching one.
    pub websocket_url: Option<String>,
    /// Zero disables the keep-alive probe.
    pub heartbeat_interval_ms: u64,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: env::var_os(PROFILE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".canvas-eval-profile")),
            headless: true,
            default_deadline_ms: 15_000,
            websocket_url: None,
            heartbeat_interval_ms: 15_000,
        }
    }
}

impl CdpConfig {
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.default_deadline_ms = deadline_ms;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Find Chrome or Chromium: `CANVAS_EVAL_CHROME`, then `PATH`, then the usual install
/// locations unless `CANVAS_EVAL_SKIP_OS_PATHS` is set.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    let from_env = env::var(CHROME_ENV)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.exists());
    if from_env.is_some() {
        return from_env;
    }

    if let Some(found) = CHROME_NAMES.iter().find_map(|name| which(name).ok()) {
        return Some(found);
    }

    let skip_os_paths = env::var(SKIP_OS_PATHS_ENV).is_ok_and(|value| !value.trim().is_empty());
    if skip_os_paths {
        return None;
    }
    install_locations()
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

#[cfg(target_os = "windows")]
const CHROME_NAMES: &[&str] = &["chrome.exe", "chromium.exe", "msedge.exe"];

#[cfg(not(target_os = "windows"))]
const CHROME_NAMES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
];

fn install_locations() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(any(target_os = "linux", target_os = "freebsd")) {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
        ]
    } else {
        &[]
    }
}
