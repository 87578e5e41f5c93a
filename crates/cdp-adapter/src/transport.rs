//! One websocket to the browser, shared by every page through flat sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::cdp::browser_protocol::target::SessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, Message, MethodId, Response};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::CdpConfig;
use crate::error::AdapterError;
use crate::launch::{launch, LaunchedBrowser};

const CLOSE_DEADLINE: Duration = Duration::from_secs(2);
const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(5);
const REQUEST_QUEUE: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
    /// Close the browser connection and kill any child process this transport launched.
    async fn shutdown(&self);
}

type LinkFactory =
    Arc<dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<BrowserLink>, AdapterError>> + Send + Sync>;

/// Transport backed by a local Chromium, or a remote browser when `websocket_url` is set.
/// A link that died is replaced on the next command.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    link: Arc<Mutex<Option<Arc<BrowserLink>>>>,
    factory: LinkFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: LinkFactory = Arc::new(|cfg: CdpConfig| {
            async move {
                let link = BrowserLink::open(cfg).await?;
                Ok::<_, AdapterError>(Arc::new(link))
            }
            .boxed()
        });
        Self::with_factory(cfg, factory)
    }

    fn with_factory(cfg: CdpConfig, factory: LinkFactory) -> Self {
        Self {
            cfg,
            link: Arc::new(Mutex::new(None)),
            factory,
        }
    }

    pub fn config(&self) -> &CdpConfig {
        &self.cfg
    }

    async fn live_link(&self) -> Result<Arc<BrowserLink>, AdapterError> {
        let mut slot = self.link.lock().await;
        match slot.as_ref() {
            Some(link) if link.is_alive() => return Ok(Arc::clone(link)),
            Some(_) => warn!(target: "cdp-transport", "browser link is gone; reconnecting"),
            None => {}
        }
        let link = (self.factory)(self.cfg.clone()).await?;
        *slot = Some(Arc::clone(&link));
        Ok(link)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        self.live_link()
            .await?
            .call(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
                self.cfg.deadline(),
            )
            .await
            .map(|_| ())
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.live_link()
            .await?
            .call(target, method, params, self.cfg.deadline())
            .await
    }

    async fn shutdown(&self) {
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.close().await;
        }
    }
}

type Reply = oneshot::Sender<Result<Value, AdapterError>>;

struct Request {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: Reply,
}

/// Submitted calls waiting for their response, keyed by protocol call id.
#[derive(Default)]
struct PendingCalls(HashMap<CallId, Reply>);

impl PendingCalls {
    /// Callers that timed out have dropped their receiver; their entries go here.
    fn track(&mut self, id: CallId, reply: Reply) {
        self.0.retain(|_, waiting| !waiting.is_closed());
        self.0.insert(id, reply);
    }

    fn resolve(&mut self, response: Response) {
        let Some(reply) = self.0.remove(&response.id) else {
            trace!(target: "cdp-transport", id = ?response.id, "response for unknown call");
            return;
        };
        let _ = reply.send(response_payload(response));
    }

    fn fail_all(&mut self, err: &AdapterError) {
        for (_, reply) in self.0.drain() {
            let _ = reply.send(Err(err.clone()));
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

struct BrowserLink {
    requests: mpsc::Sender<Request>,
    pump: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl BrowserLink {
    async fn open(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => (None, url),
            None => {
                let LaunchedBrowser { child, ws_url } = launch(&cfg).await?;
                (Some(child), ws_url)
            }
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::connection(format!("{ws_url}: {err}")))?;

        let (requests, inbox) = mpsc::channel(REQUEST_QUEUE);
        let alive = Arc::new(AtomicBool::new(true));
        let pump_alive = Arc::clone(&alive);
        let pump = tokio::spawn(async move {
            let outcome = pump(conn, inbox).await;
            pump_alive.store(false, Ordering::Relaxed);
            if let Err(err) = outcome {
                error!(target: "cdp-transport", %err, "browser connection lost");
            }
        });
        let heartbeat = spawn_heartbeat(
            requests.clone(),
            Arc::clone(&alive),
            cfg.heartbeat_interval(),
            cfg.deadline().min(HEARTBEAT_DEADLINE),
        );

        info!(target: "cdp-transport", url = %ws_url, "browser connected");
        Ok(Self {
            requests,
            pump,
            heartbeat,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        roundtrip(&self.requests, target, method, params, deadline).await
    }

    async fn close(&self) {
        if self.is_alive() {
            if let Err(err) = self
                .call(CommandTarget::Browser, "Browser.close", json!({}), CLOSE_DEADLINE)
                .await
            {
                debug!(target: "cdp-transport", %err, "Browser.close did not complete");
            }
        }
        self.stop_tasks();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                debug!(target: "cdp-transport", ?err, "chromium already exited");
            }
        }
        info!(target: "cdp-transport", "browser connection closed");
    }

    fn stop_tasks(&self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump.abort();
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
    }
}

impl Drop for BrowserLink {
    fn drop(&mut self) {
        self.stop_tasks();
        let Some(mut child) = self.child.get_mut().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = child.kill().await {
                        warn!(target: "cdp-transport", ?err, "failed to kill chromium");
                    }
                });
            }
            Err(_) => debug!(target: "cdp-transport", "no runtime left to kill chromium"),
        }
    }
}

async fn roundtrip(
    requests: &mpsc::Sender<Request>,
    target: CommandTarget,
    method: &str,
    params: Value,
    deadline: Duration,
) -> Result<Value, AdapterError> {
    let (reply, response) = oneshot::channel();
    requests
        .send(Request {
            target,
            method: method.to_string(),
            params,
            reply,
        })
        .await
        .map_err(|_| AdapterError::connection("browser link closed"))?;

    match tokio::time::timeout(deadline, response).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(AdapterError::connection(format!(
            "{method} dropped without a response"
        ))),
        Err(_) => Err(AdapterError::timeout(format!(
            "{method} exceeded {}ms",
            deadline.as_millis()
        ))),
    }
}

async fn pump(
    mut conn: Connection<CdpEventMessage>,
    mut inbox: mpsc::Receiver<Request>,
) -> Result<(), AdapterError> {
    let mut pending = PendingCalls::default();
    loop {
        tokio::select! {
            Some(request) = inbox.recv() => submit(&mut conn, request, &mut pending),
            message = conn.next() => match message {
                Some(Ok(Message::Response(response))) => pending.resolve(response),
                Some(Ok(Message::Event(_))) => {}
                Some(Err(err)) => {
                    let err = classify(err);
                    pending.fail_all(&err);
                    return Err(err);
                }
                None => {
                    debug!(target: "cdp-transport", in_flight = pending.len(), "websocket closed");
                    pending.fail_all(&AdapterError::connection("websocket closed"));
                    return Ok(());
                }
            },
        }
    }
}

fn submit(conn: &mut Connection<CdpEventMessage>, request: Request, pending: &mut PendingCalls) {
    let session = match request.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(id) => Some(SessionId::from(id)),
    };
    let method: MethodId = request.method.into();
    match conn.submit_command(method, session, request.params) {
        Ok(id) => pending.track(id, request.reply),
        Err(err) => {
            let _ = request.reply.send(Err(AdapterError::connection(err.to_string())));
        }
    }
}

fn response_payload(response: Response) -> Result<Value, AdapterError> {
    match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::protocol(format!(
            "cdp error {}: {}",
            error.code, error.message
        ))
        .retriable(error.code >= 500)),
        (None, None) => Err(AdapterError::protocol("empty response")),
    }
}

fn classify(err: CdpError) -> AdapterError {
    let detail = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::timeout(detail),
        CdpError::JavascriptException(_) => AdapterError::script(detail),
        CdpError::Serde(_) => AdapterError::protocol(detail),
        _ => AdapterError::connection(detail).retriable(true),
    }
}

/// Probe the browser with `Browser.getVersion`; a failed probe marks the link dead so the
/// next command reconnects.
fn spawn_heartbeat(
    requests: mpsc::Sender<Request>,
    alive: Arc<AtomicBool>,
    every: Duration,
    deadline: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            let probe = roundtrip(
                &requests,
                CommandTarget::Browser,
                "Browser.getVersion",
                json!({}),
                deadline,
            )
            .await;
            if let Err(err) = probe {
                warn!(target: "cdp-transport", %err, "heartbeat failed");
                alive.store(false, Ordering::Relaxed);
                break;
            }
        }
    }))
}
