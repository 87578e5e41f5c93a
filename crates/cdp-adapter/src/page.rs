//! Page targets over a [`CdpTransport`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::PageId;
use crate::metrics::{self, CommandTimer};
use crate::targets::OpenTargets;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DOM_READY: &str = "document.readyState !== 'loading'";

/// Owns the browser transport and the pages opened through it. The browser is launched on
/// the first page that needs it.
pub struct CdpAdapter {
    cfg: CdpConfig,
    transport: Arc<dyn CdpTransport>,
    targets: Arc<OpenTargets>,
    started: OnceCell<()>,
}

impl CdpAdapter {
    pub fn new(cfg: CdpConfig) -> Self {
        let transport = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: CdpConfig, transport: Arc<dyn CdpTransport>) -> Self {
        Self {
            cfg,
            transport,
            targets: Arc::new(OpenTargets::default()),
            started: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &CdpConfig {
        &self.cfg
    }

    pub fn open_pages(&self) -> usize {
        self.targets.len()
    }

    pub fn deadline(&self) -> Duration {
        self.cfg.deadline()
    }

    pub async fn start(&self) -> Result<(), AdapterError> {
        self.started
            .get_or_try_init(|| async {
                self.transport.start().await?;
                info!(target: "cdp-adapter", headless = self.cfg.headless, "browser ready");
                Ok::<(), AdapterError>(())
            })
            .await
            .map(|_| ())
    }

    /// Create a page target, attach a flat session to it and load `url`.
    pub async fn open_page(&self, url: &str) -> Result<PageHandle, AdapterError> {
        self.start().await?;

        let created = self
            .browser_command("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = string_field(&created, "targetId")?;
        let attached = self
            .browser_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = string_field(&attached, "sessionId")?;

        let page = PageHandle {
            id: PageId::new(),
            target_id: target_id.clone(),
            session_id: session_id.clone(),
            transport: Arc::clone(&self.transport),
            targets: Arc::clone(&self.targets),
            deadline: self.deadline(),
        };
        self.targets.track(page.id, target_id, session_id);
        metrics::record_page_opened();

        page.send("Page.enable", json!({})).await?;
        page.send("Runtime.enable", json!({})).await?;
        if url != "about:blank" {
            page.navigate(url).await?;
        }
        debug!(target: "cdp-adapter", page = ?page.id, url, "page opened");
        Ok(page)
    }

    /// Close every page still open and disconnect from the browser.
    pub async fn shutdown(&self) {
        for target_id in self.targets.take_all() {
            let closed = self
                .browser_command("Target.closeTarget", json!({ "targetId": target_id }))
                .await;
            if let Err(err) = closed {
                debug!(target: "cdp-adapter", %target_id, %err, "closeTarget failed during shutdown");
            }
        }
        self.transport.shutdown().await;
    }

    async fn browser_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        timed(&*self.transport, CommandTarget::Browser, method, params).await
    }
}

async fn timed(
    transport: &dyn CdpTransport,
    target: CommandTarget,
    method: &str,
    params: Value,
) -> Result<Value, AdapterError> {
    let timer = CommandTimer::start(method);
    let outcome = transport.send_command(target, method, params).await;
    timer.finish(&outcome);
    outcome
}

fn string_field(response: &Value, field: &str) -> Result<String, AdapterError> {
    response
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AdapterError::protocol(format!("response is missing `{field}`")))
}

#[derive(Serialize)]
struct Clip {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    scale: f64,
}

/// An attached page target.
pub struct PageHandle {
    id: PageId,
    target_id: String,
    session_id: String,
    transport: Arc<dyn CdpTransport>,
    targets: Arc<OpenTargets>,
    deadline: Duration,
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageHandle")
            .field("id", &self.id)
            .field("target_id", &self.target_id)
            .finish_non_exhaustive()
    }
}

impl PageHandle {
    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        timed(
            &*self.transport,
            CommandTarget::Session(self.session_id.clone()),
            method,
            params,
        )
        .await
    }

    /// Load `url` and wait until the DOM content has loaded.
    pub async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        let response = self.send("Page.navigate", json!({ "url": url })).await?;
        let failure = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty());
        if let Some(error_text) = failure {
            return Err(AdapterError::connection(format!(
                "navigation to {url} failed: {error_text}"
            )));
        }
        self.targets.navigated(&self.id, url);
        self.wait_for_function(DOM_READY, self.deadline).await
    }

    /// Evaluate `expression` in the page, awaiting promises and returning the value as JSON.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        let mut response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("uncaught exception");
            return Err(AdapterError::script(message).with_data(details.clone()));
        }
        Ok(response
            .pointer_mut("/result/value")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Poll `predicate` until it is truthy or `timeout` elapses.
    ///
    /// Evaluation failures such as a context torn down by navigation are retried; an
    /// exception thrown by the predicate is returned at once.
    pub async fn wait_for_function(
        &self,
        predicate: &str,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let expression = format!("Boolean({predicate})");
        let give_up = Instant::now() + timeout;
        let mut last_error = None;

        loop {
            match self.evaluate(&expression).await {
                Ok(Value::Bool(true)) => return Ok(()),
                Ok(_) => {}
                Err(err) if err.kind == AdapterErrorKind::Script => return Err(err),
                Err(err) => last_error = Some(err.to_string()),
            }
            if Instant::now() >= give_up {
                let err = AdapterError::timeout(format!(
                    "`{predicate}` still false after {}ms",
                    timeout.as_millis()
                ));
                return Err(match last_error {
                    Some(last) => err.with_data(json!({ "last_error": last })),
                    None => err,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// PNG of the whole scrollable document, not just the viewport.
    pub async fn capture_full_page(&self) -> Result<Vec<u8>, AdapterError> {
        let layout = self.send("Page.getLayoutMetrics", json!({})).await?;
        let content = layout
            .get("cssContentSize")
            .or_else(|| layout.get("contentSize"));
        let clip = content.and_then(|size| {
            let width = size.get("width").and_then(Value::as_f64)?;
            let height = size.get("height").and_then(Value::as_f64)?;
            (width > 0.0 && height > 0.0).then(|| Clip {
                x: 0.0,
                y: 0.0,
                width: width.ceil(),
                height: height.ceil(),
                scale: 1.0,
            })
        });

        let mut params = json!({ "format": "png", "captureBeyondViewport": true });
        match clip {
            Some(clip) => params["clip"] = json!(clip),
            None => {
                warn!(target: "cdp-adapter", page = ?self.id, "no content size reported; capturing the viewport");
            }
        }

        let response = self.send("Page.captureScreenshot", params).await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::protocol("screenshot response has no data"))?;
        STANDARD
            .decode(data)
            .map_err(|err| AdapterError::protocol(format!("screenshot is not base64: {err}")))
    }

    pub async fn close(&self) -> Result<(), AdapterError> {
        self.targets.forget(&self.id);
        timed(
            &*self.transport,
            CommandTarget::Browser,
            "Target.closeTarget",
            json!({ "targetId": self.target_id }),
        )
        .await
        .map(|_| ())
    }
}
