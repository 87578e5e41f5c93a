//! Spawning a local Chromium and finding its DevTools endpoint.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use serde_json::json;
use tokio::time::timeout;
use tracing::debug;

use crate::config::CdpConfig;
use crate::error::AdapterError;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
/// Matches the default page size used when the validator page is rendered elsewhere.
const WINDOW_SIZE: (u32, u32) = (1280, 720);
const STDERR_PREVIEW_LINES: usize = 8;
const NO_SANDBOX_ENV: &str = "CANVAS_EVAL_DISABLE_SANDBOX";

const QUIET_FLAGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-sync",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];

const HEADLESS_FLAGS: &[&str] = &["--headless=new", "--hide-scrollbars", "--mute-audio"];

pub(crate) struct LaunchedBrowser {
    pub child: Child,
    pub ws_url: String,
}

pub(crate) async fn launch(cfg: &CdpConfig) -> Result<LaunchedBrowser, AdapterError> {
    let browser_config = browser_config(cfg)?;
    let mut child = browser_config
        .launch()
        .map_err(|err| AdapterError::launch(format!("failed to spawn chromium: {err}")))?;
    let ws_url = read_devtools_url(&mut child, LAUNCH_TIMEOUT).await?;
    debug!(target: "cdp-transport", %ws_url, "chromium launched");
    Ok(LaunchedBrowser { child, ws_url })
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    let has_executable = !cfg.executable.as_os_str().is_empty();
    if has_executable && !cfg.executable.exists() {
        return Err(AdapterError::launch(format!(
            "chrome executable not found at {}",
            cfg.executable.display()
        ))
        .with_data(json!({
            "expected": cfg.executable,
            "hint": "Set CANVAS_EVAL_CHROME to the full path of chrome/chromium."
        })));
    }

    let profile_dir = profile_dir(cfg)?;
    let mut builder = BrowserConfig::builder()
        .request_timeout(cfg.deadline())
        .launch_timeout(LAUNCH_TIMEOUT)
        .window_size(WINDOW_SIZE.0, WINDOW_SIZE.1)
        .args(chrome_flags(cfg.headless))
        .user_data_dir(profile_dir);
    if !cfg.headless {
        builder = builder.with_head();
    }
    if sandbox_disabled() {
        builder = builder.no_sandbox();
    }
    if has_executable {
        builder = builder.chrome_executable(cfg.executable.clone());
    }

    builder
        .build()
        .map_err(|err| AdapterError::launch(format!("invalid browser config: {err}")))
}

fn chrome_flags(headless: bool) -> Vec<String> {
    let extra: &[&str] = if headless { HEADLESS_FLAGS } else { &[] };
    QUIET_FLAGS
        .iter()
        .chain(extra)
        .map(|flag| flag.to_string())
        .collect()
}

fn profile_dir(cfg: &CdpConfig) -> Result<PathBuf, AdapterError> {
    let dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        env::current_dir()
            .map_err(|err| AdapterError::launch(format!("cannot resolve profile dir: {err}")))?
            .join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&dir).map_err(|err| {
        AdapterError::launch(format!("cannot create profile dir {}: {err}", dir.display()))
    })?;
    Ok(dir)
}

fn sandbox_disabled() -> bool {
    env::var(NO_SANDBOX_ENV).is_ok_and(|value| value == "1" || value.eq_ignore_ascii_case("true"))
}

/// Scan Chromium's stderr until it prints `DevTools listening on ws://...`.
async fn read_devtools_url(child: &mut Child, wait: Duration) -> Result<String, AdapterError> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AdapterError::launch("chromium stderr is not piped"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let scan = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| AdapterError::launch(err.to_string()))?;
            if let Some(url) = devtools_url(&line) {
                return Ok(url);
            }
            if preview.len() < STDERR_PREVIEW_LINES {
                preview.push(line);
            }
        }
        Err(AdapterError::launch(format!(
            "chromium exited before announcing its devtools url; stderr: {}",
            preview.join(" | ")
        )))
    };

    timeout(wait, scan)
        .await
        .map_err(|_| AdapterError::timeout("waiting for the chromium devtools url"))?
}

fn devtools_url(line: &str) -> Option<String> {
    let (_, url) = line.rsplit_once("listening on ")?;
    let url = url.trim();
    (url.starts_with("ws") && url.contains("/devtools/browser/")).then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;

    #[test]
    fn finds_devtools_banner() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-123";
        assert_eq!(
            devtools_url(line).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123")
        );
        assert!(devtools_url("[0101/000000.000:ERROR] gpu process crashed").is_none());
        assert!(devtools_url("listening on http://localhost:5173").is_none());
    }

    #[test]
    fn headless_adds_flags() {
        let headed = chrome_flags(false);
        let headless = chrome_flags(true);
        assert_eq!(headless.len(), headed.len() + HEADLESS_FLAGS.len());
        assert!(headless.contains(&"--headless=new".to_string()));
        assert!(!headed.iter().any(|flag| flag.starts_with("--headless")));
    }

    #[test]
    fn missing_executable_fails_before_launch() {
        let cfg = CdpConfig {
            executable: PathBuf::from("/no/such/chrome"),
            ..CdpConfig::default()
        };
        let err = browser_config(&cfg).expect_err("missing binary");
        assert_eq!(err.kind, AdapterErrorKind::Launch);
        assert!(err.to_string().contains("/no/such/chrome"));
        assert!(err.data.is_some());
    }
}
