//! Sessions backed by real browser pages running the validator bridge.
//!
//! The page at the validator URL installs `window.__tldrawValidator` with `reset()`,
//! `validate(actions, options)`, `getSystemPrompt()` and `getResponseSchema()`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{CdpAdapter, CdpConfig, PageHandle};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::EvalConfig;
use crate::error::ValidatorError;
use crate::model::{Action, RenderOptions, ValidationResult};
use crate::server::RendererServer;
use crate::session::{SessionBackend, ValidatorSession};

pub const BRIDGE_GLOBAL: &str = "window.__tldrawValidator";

/// Predicate that is true once the bridge exposes `capability` as a function.
pub fn ready_predicate(capability: &str) -> String {
    format!("typeof {BRIDGE_GLOBAL}?.{capability} === 'function'")
}

/// Expression calling `validate` with the payload embedded as a JSON literal.
pub fn validate_expression(
    actions: &[Action],
    options: Option<&RenderOptions>,
) -> Result<String, ValidatorError> {
    let payload = json!({ "actions": actions, "options": options });
    let literal = serde_json::to_string(&payload)?;
    Ok(format!(
        "((payload) => {BRIDGE_GLOBAL}.validate(payload.actions, payload.options ?? undefined))({literal})"
    ))
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub url: String,
    pub cdp: CdpConfig,
    /// How long a fresh page may take to expose the bridge.
    pub ready_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(url: impl Into<String>, cdp: CdpConfig) -> Self {
        let ready_timeout = Duration::from_millis(cdp.default_deadline_ms);
        Self {
            url: url.into(),
            cdp,
            ready_timeout,
        }
    }

    pub fn from_eval_config(config: &EvalConfig) -> Self {
        let mut cdp = CdpConfig::default()
            .with_headless(config.headless)
            .with_deadline_ms(config.timeout_ms);
        if let Some(executable) = &config.chrome_executable {
            cdp.executable = executable.clone();
        }
        Self::new(config.validator_url.clone(), cdp)
    }
}

/// One browser, many pages: each session is a page target on the shared adapter.
pub struct CdpBackend {
    config: BridgeConfig,
    adapter: Arc<CdpAdapter>,
    server: Option<Arc<RendererServer>>,
}

impl CdpBackend {
    pub fn new(config: BridgeConfig) -> Self {
        let adapter = Arc::new(CdpAdapter::new(config.cdp.clone()));
        Self {
            config,
            adapter,
            server: None,
        }
    }

    pub fn with_adapter(config: BridgeConfig, adapter: Arc<CdpAdapter>) -> Self {
        Self {
            config,
            adapter,
            server: None,
        }
    }

    /// Keep the dev server alive for as long as the backend and stop it on shutdown.
    pub fn with_server(mut self, server: Arc<RendererServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

#[async_trait]
impl SessionBackend for CdpBackend {
    type Session = BridgeSession;

    async fn open_session(&self) -> Result<BridgeSession, ValidatorError> {
        let page = self.adapter.open_page(&self.config.url).await?;
        if let Err(err) = page
            .wait_for_function(&ready_predicate("validate"), self.config.ready_timeout)
            .await
        {
            if let Err(close_err) = page.close().await {
                debug!(target: "validator-pool", error = %close_err, "close after bridge timeout");
            }
            return Err(ValidatorError::Startup(format!(
                "validator bridge not ready at {}: {err}",
                self.config.url
            )));
        }
        debug!(target: "validator-pool", page = ?page.id(), url = %self.config.url, "bridge session ready");
        Ok(BridgeSession { page })
    }

    async fn shutdown(&self) -> Result<(), ValidatorError> {
        self.adapter.shutdown().await;
        if let Some(server) = &self.server {
            server.shutdown().await;
        }
        Ok(())
    }
}

pub struct BridgeSession {
    page: PageHandle,
}

impl BridgeSession {
    pub fn page(&self) -> &PageHandle {
        &self.page
    }
}

#[async_trait]
impl ValidatorSession for BridgeSession {
    async fn reset(&self) -> Result<(), ValidatorError> {
        self.page
            .evaluate(&format!("{BRIDGE_GLOBAL}.reset()"))
            .await?;
        Ok(())
    }

    async fn validate(
        &self,
        actions: &[Action],
        options: Option<&RenderOptions>,
    ) -> Result<ValidationResult, ValidatorError> {
        let expression = validate_expression(actions, options)?;
        match self.page.evaluate(&expression).await? {
            Value::Null => Err(ValidatorError::Bridge(
                "validate() returned no result".into(),
            )),
            value => Ok(serde_json::from_value(value)?),
        }
    }

    async fn capture_page(&self, target: &Path) -> Result<(), ValidatorError> {
        let bytes = self.page.capture_full_page().await?;
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(target, bytes).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ValidatorError> {
        self.page.close().await?;
        Ok(())
    }
}

/// Open a throwaway browser, wait for `capability` and evaluate `expression`.
async fn evaluate_once(
    config: &BridgeConfig,
    capability: &str,
    expression: &str,
) -> Result<Value, ValidatorError> {
    let adapter = CdpAdapter::new(config.cdp.clone());
    let outcome = async {
        let page = adapter.open_page(&config.url).await?;
        page.wait_for_function(&ready_predicate(capability), config.ready_timeout)
            .await?;
        let value = page.evaluate(expression).await?;
        Ok::<Value, ValidatorError>(value)
    }
    .await;
    adapter.shutdown().await;
    outcome
}

/// The instructions the renderer wants models to follow.
pub async fn fetch_system_prompt(config: &BridgeConfig) -> Result<String, ValidatorError> {
    let value = evaluate_once(
        config,
        "getSystemPrompt",
        &format!("{BRIDGE_GLOBAL}.getSystemPrompt()"),
    )
    .await?;
    match value {
        Value::String(prompt) => {
            info!(target: "validator-client", chars = prompt.len(), "fetched system prompt");
            Ok(prompt)
        }
        other => Err(ValidatorError::Bridge(format!(
            "getSystemPrompt() returned {other}"
        ))),
    }
}

/// JSON schema of the `{"actions": [...]}` response format.
pub async fn fetch_response_schema(config: &BridgeConfig) -> Result<Value, ValidatorError> {
    evaluate_once(
        config,
        "getResponseSchema",
        &format!("{BRIDGE_GLOBAL}.getResponseSchema()"),
    )
    .await
}

/// Synchronous [`fetch_system_prompt`] for environment construction.
///
/// Inside a running tokio runtime the fetch happens on one dedicated thread with its own
/// runtime, since blocking the caller's runtime on itself would deadlock.
pub fn fetch_system_prompt_blocking(config: BridgeConfig) -> Result<String, ValidatorError> {
    let run = move || -> Result<String, ValidatorError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(fetch_system_prompt(&config))
    };

    let outcome = if tokio::runtime::Handle::try_current().is_ok() {
        std::thread::Builder::new()
            .name("system-prompt-fetch".into())
            .spawn(run)?
            .join()
            .unwrap_or_else(|_| {
                Err(ValidatorError::TaskAborted(
                    "system prompt worker panicked".into(),
                ))
            })
    } else {
        run()
    };

    outcome.map_err(|err| {
        warn!(target: "validator-client", error = %err, "system prompt fetch failed");
        ValidatorError::SystemPrompt(err.to_string())
    })
}
