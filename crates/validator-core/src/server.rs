//! Handle for the renderer dev server that hosts the validator page.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

const LOG_TAIL_LINES: usize = 60;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_PORT: u16 = 5173;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid validator url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("validator server i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validator server exited before it became ready. Last logs:\n{log_tail}")]
    Exited { log_tail: String },
    #[error("Validator server did not become ready: {url}\nLast logs:\n{log_tail}")]
    NotReady { url: String, log_tail: String },
}

#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub url: String,
    pub agent_dir: PathBuf,
    pub log_dir: PathBuf,
    pub startup_timeout: Duration,
    pub program: String,
    /// Arguments after the program. `None` runs the dev script on the URL's port.
    pub args: Option<Vec<String>>,
}

impl ServerOptions {
    pub fn new(url: impl Into<String>, agent_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            agent_dir: agent_dir.into(),
            log_dir: PathBuf::from("outputs/validator"),
            startup_timeout: Duration::from_secs(60),
            program: "npm".to_string(),
            args: None,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join("validator.log")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.log_dir.join("validator.pid")
    }

    fn command_args(&self, port: u16) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => vec![
                "run".into(),
                "dev".into(),
                "--".into(),
                "--host".into(),
                "127.0.0.1".into(),
                "--port".into(),
                port.to_string(),
                "--strictPort".into(),
            ],
        }
    }
}

/// Owned by whoever ensured the server; shared through `Arc` with the session backend.
/// A server this handle did not launch is never touched.
#[derive(Debug)]
pub struct RendererServer {
    url: String,
    child: Mutex<Option<Child>>,
    log_path: Option<PathBuf>,
}

impl RendererServer {
    /// Handle for a server managed elsewhere.
    pub fn external(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            child: Mutex::new(None),
            log_path: None,
        })
    }

    /// Make sure the validator page answers, launching the dev server when the URL points at
    /// this machine and nothing is listening yet.
    pub async fn ensure(options: ServerOptions) -> Result<Arc<Self>, ServerError> {
        if is_live(&options.url, PROBE_TIMEOUT).await {
            debug!(target: "validator-client", url = %options.url, "validator server already live");
            return Ok(Self::external(options.url));
        }

        let parsed = Url::parse(&options.url).map_err(|source| ServerError::InvalidUrl {
            url: options.url.clone(),
            source,
        })?;
        if !is_localhost(parsed.host_str()) {
            return Ok(Self::external(options.url));
        }
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        std::fs::create_dir_all(&options.log_dir)?;
        let log_path = options.log_path();
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let log_err = log.try_clone()?;

        let args = options.command_args(port);
        info!(
            target: "validator-client",
            program = %options.program,
            ?args,
            dir = %options.agent_dir.display(),
            "launching validator server"
        );
        let mut child = Command::new(&options.program)
            .args(&args)
            .current_dir(&options.agent_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()?;
        if let Some(pid) = child.id() {
            std::fs::write(options.pid_path(), pid.to_string())?;
        }

        let deadline = Instant::now() + options.startup_timeout;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait()? {
                warn!(target: "validator-client", %status, "validator server exited during startup");
                return Err(ServerError::Exited {
                    log_tail: read_log_tail(&log_path, LOG_TAIL_LINES),
                });
            }
            if is_live(&options.url, PROBE_TIMEOUT).await {
                info!(target: "validator-client", url = %options.url, "validator server ready");
                return Ok(Arc::new(Self {
                    url: options.url,
                    child: Mutex::new(Some(child)),
                    log_path: Some(log_path),
                }));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if let Err(err) = child.kill().await {
            debug!(target: "validator-client", error = %err, "failed to kill unready server");
        }
        Err(ServerError::NotReady {
            url: options.url,
            log_tail: read_log_tail(&log_path, LOG_TAIL_LINES),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub async fn is_managed(&self) -> bool {
        self.child.lock().await.is_some()
    }

    /// Stop the server if this handle launched it. Safe to call more than once.
    pub async fn shutdown(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(err) = child.kill().await {
                    warn!(target: "validator-client", error = %err, "failed to stop validator server");
                    return;
                }
                info!(target: "validator-client", url = %self.url, "validator server stopped");
            }
        }
    }
}

/// HTTP GET answering 2xx or 3xx within `timeout`.
pub async fn is_live(url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            status.is_success() || status.is_redirection()
        }
        Err(_) => false,
    }
}

fn is_localhost(host: Option<&str>) -> bool {
    matches!(host, None | Some("localhost") | Some("127.0.0.1"))
}

/// Last `max_lines` lines of the server log, or an empty string.
pub fn read_log_tail(path: &Path, max_lines: usize) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_status(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/validator.html")
    }

    async fn unused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/validator.html")
    }

    #[tokio::test]
    async fn liveness_accepts_success_and_redirects() {
        assert!(is_live(&serve_status("200 OK").await, PROBE_TIMEOUT).await);
        assert!(is_live(&serve_status("302 Found").await, PROBE_TIMEOUT).await);
        assert!(!is_live(&serve_status("500 Internal Server Error").await, PROBE_TIMEOUT).await);
        assert!(!is_live(&unused_url().await, PROBE_TIMEOUT).await);
    }

    #[tokio::test]
    async fn live_server_is_not_managed() {
        let url = serve_status("200 OK").await;
        let server = RendererServer::ensure(ServerOptions::new(url, ".")).await.unwrap();
        assert!(!server.is_managed().await);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn remote_urls_are_left_alone() {
        let options = ServerOptions::new("http://203.0.113.10:1/validator.html", ".");
        let server = RendererServer::ensure(ServerOptions {
            startup_timeout: Duration::from_millis(10),
            ..options
        })
        .await
        .unwrap();
        assert!(!server.is_managed().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_reports_log_tail() {
        let tmp = tempdir().unwrap();
        let options = ServerOptions {
            log_dir: tmp.path().join("validator"),
            program: "sh".into(),
            args: Some(vec!["-c".into(), "echo boom; exit 3".into()]),
            ..ServerOptions::new(unused_url().await, tmp.path())
        };
        let err = RendererServer::ensure(options.clone()).await.unwrap_err();
        match err {
            ServerError::Exited { log_tail } => assert!(log_tail.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(options.pid_path().exists());
    }

    #[test]
    fn log_tail_keeps_last_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("validator.log");
        let content: Vec<String> = (0..100).map(|n| format!("line {n}")).collect();
        std::fs::write(&path, content.join("\n")).unwrap();
        let tail = read_log_tail(&path, LOG_TAIL_LINES);
        assert_eq!(tail.lines().count(), 60);
        assert!(tail.starts_with("line 40"));
        assert_eq!(read_log_tail(&tmp.path().join("missing.log"), 5), "");
    }
}
