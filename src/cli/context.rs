use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::OnceCell;
use tracing::warn;
use validator_core::{
    BridgeConfig, CdpBackend, EvalConfig, RendererServer, ServerOptions, ValidatorClient,
};

pub type EvalClient = ValidatorClient<CdpBackend>;

pub struct CliContext {
    config: Arc<EvalConfig>,
    config_path: PathBuf,
    ensure_server: bool,
    server: OnceCell<Option<Arc<RendererServer>>>,
    client: OnceCell<Arc<EvalClient>>,
}

impl CliContext {
    pub fn new(config: EvalConfig, config_path: PathBuf, ensure_server: bool) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            ensure_server,
            server: OnceCell::new(),
            client: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::from_eval_config(&self.config)
    }

    pub fn server_options(&self) -> ServerOptions {
        let server = &self.config.server;
        ServerOptions {
            log_dir: server.log_dir.clone(),
            startup_timeout: Duration::from_millis(server.startup_timeout_ms),
            ..ServerOptions::new(self.config.validator_url.clone(), server.agent_dir.clone())
        }
    }

    /// The renderer server, launched on first use when `--ensure-server` was given.
    pub async fn server(&self) -> Result<Option<Arc<RendererServer>>> {
        self.server
            .get_or_try_init(|| async {
                if !self.ensure_server {
                    return Ok(None);
                }
                let server = RendererServer::ensure(self.server_options()).await?;
                Ok::<_, anyhow::Error>(Some(server))
            })
            .await
            .cloned()
    }

    /// Shared validator client. Browsers launch on the first validation, not here.
    pub async fn client(&self) -> Result<Arc<EvalClient>> {
        self.client
            .get_or_try_init(|| async {
                let mut backend = CdpBackend::new(self.bridge_config());
                if let Some(server) = self.server().await? {
                    backend = backend.with_server(server);
                }
                let client = ValidatorClient::new(
                    backend,
                    self.config.pool_size,
                    self.config.client_settings(),
                );
                Ok::<_, anyhow::Error>(Arc::new(client))
            })
            .await
            .map(Arc::clone)
    }

    pub async fn shutdown(&self) {
        if let Some(client) = self.client.get() {
            if let Err(err) = client.close().await {
                warn!(?err, "failed to close validator client");
            }
            return;
        }
        if let Some(Some(server)) = self.server.get() {
            server.shutdown().await;
        }
    }
}
