//! Pooled validation client: lease a session, run the bridge, persist the image.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::artifacts::RunArtifacts;
use crate::error::ValidatorError;
use crate::model::{Action, ErrorLogEntry, RenderOptions, ValidationResult};
use crate::pool::SessionPool;
use crate::postprocess::resolve_image;
use crate::session::{SessionBackend, ValidatorSession};

#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub save_screenshots: bool,
    pub log_errors: bool,
    pub screenshot_dir: PathBuf,
    pub error_log_dir: PathBuf,
    pub render_options: Option<RenderOptions>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            save_screenshots: true,
            log_errors: true,
            screenshot_dir: PathBuf::from("outputs/screenshots"),
            error_log_dir: PathBuf::from("outputs/errors"),
            render_options: None,
        }
    }
}

/// What the scorer needs from a validator. Implemented by [`ValidatorClient`]; tests supply
/// their own.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate_actions(
        &self,
        actions: Vec<Action>,
    ) -> Result<ValidationResult, ValidatorError>;

    /// Append an entry to the run's error log. Returns the log path when something was written.
    async fn log_error(&self, entry: &ErrorLogEntry) -> Option<PathBuf>;
}

pub struct ValidatorClient<B: SessionBackend> {
    pool: SessionPool<B>,
    artifacts: Arc<RunArtifacts>,
    settings: Arc<ClientSettings>,
}

impl<B: SessionBackend> ValidatorClient<B> {
    pub fn new(backend: B, pool_size: usize, settings: ClientSettings) -> Self {
        let artifacts = RunArtifacts::new(
            settings.screenshot_dir.clone(),
            settings.error_log_dir.clone(),
            settings.save_screenshots,
            settings.log_errors,
        );
        Self {
            pool: SessionPool::new(backend, pool_size),
            artifacts: Arc::new(artifacts),
            settings: Arc::new(settings),
        }
    }

    pub fn pool(&self) -> &SessionPool<B> {
        &self.pool
    }

    pub fn artifacts(&self) -> &RunArtifacts {
        &self.artifacts
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Create run directories and open the session pool. Idempotent.
    ///
    /// Unusable artifact directories only degrade what gets saved; the pool still starts.
    pub async fn start(&self) -> Result<(), ValidatorError> {
        if let Err(err) = self.artifacts.prepare() {
            warn!(target: "validator-client", error = %err, "run artifacts unavailable");
        }
        self.pool.start().await
    }

    /// Run one validation round-trip on a leased session.
    ///
    /// The round-trip runs on its own task so a caller that stops polling cannot strand a
    /// session half-way through a validation; the lease is returned whichever way it ends.
    pub async fn validate(
        &self,
        actions: Vec<Action>,
        screenshot_path: Option<PathBuf>,
    ) -> Result<ValidationResult, ValidatorError> {
        self.start().await?;
        let pool = self.pool.clone();
        let artifacts = Arc::clone(&self.artifacts);
        let settings = Arc::clone(&self.settings);

        let task = tokio::spawn(async move {
            let lease = pool.lease().await?;
            round_trip(&*lease, &actions, &artifacts, &settings, screenshot_path).await
        });
        task.await
            .map_err(|err| ValidatorError::TaskAborted(err.to_string()))?
    }

    pub async fn append_error_log(&self, entry: &ErrorLogEntry) -> Option<PathBuf> {
        match self.artifacts.append_error(entry).await {
            Ok(path) => path,
            Err(err) => {
                warn!(target: "validator-client", error = %err, "failed to append error log");
                None
            }
        }
    }

    pub async fn close(&self) -> Result<(), ValidatorError> {
        self.pool.close().await
    }
}

async fn round_trip(
    session: &dyn ValidatorSession,
    actions: &[Action],
    artifacts: &RunArtifacts,
    settings: &ClientSettings,
    screenshot_path: Option<PathBuf>,
) -> Result<ValidationResult, ValidatorError> {
    let started = Instant::now();
    session.reset().await?;
    let mut result = session
        .validate(actions, settings.render_options.as_ref())
        .await?;
    resolve_image(
        &mut result,
        session,
        artifacts,
        settings.save_screenshots,
        screenshot_path.as_deref(),
    )
    .await;
    debug!(
        target: "validator-client",
        actions = actions.len(),
        success = result.is_success(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "validation round-trip finished"
    );
    Ok(result)
}

#[async_trait]
impl<B: SessionBackend> Validator for ValidatorClient<B> {
    async fn validate_actions(
        &self,
        actions: Vec<Action>,
    ) -> Result<ValidationResult, ValidatorError> {
        self.validate(actions, None).await
    }

    async fn log_error(&self, entry: &ErrorLogEntry) -> Option<PathBuf> {
        self.append_error_log(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ErrorStage, ImagePayload, ImageSource};
    use crate::testing::{FakeBackend, FakeBehavior};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn settings(root: &std::path::Path) -> ClientSettings {
        ClientSettings {
            screenshot_dir: root.join("screenshots"),
            error_log_dir: root.join("errors"),
            ..ClientSettings::default()
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_pool_size() {
        let tmp = tempdir().unwrap();
        let behavior = FakeBehavior {
            validate_delay: Duration::from_millis(30),
            ..FakeBehavior::default()
        };
        let client = Arc::new(ValidatorClient::new(
            FakeBackend::new(behavior),
            2,
            ClientSettings {
                save_screenshots: false,
                ..settings(tmp.path())
            },
        ));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                client.validate(vec![json!({"type": "create"})], None).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_success());
        }
        let backend = client.pool().backend();
        assert_eq!(backend.validations(), 6);
        assert_eq!(backend.resets(), 6);
        assert!(backend.max_active() <= 2);
        assert_eq!(client.pool().available(), 2);
    }

    #[tokio::test]
    async fn failing_round_trip_returns_session() {
        let tmp = tempdir().unwrap();
        let behavior = FakeBehavior {
            validate_error: Some("renderer crashed".into()),
            ..FakeBehavior::default()
        };
        let client = ValidatorClient::new(FakeBackend::new(behavior), 1, settings(tmp.path()));

        for _ in 0..3 {
            let err = client.validate(vec![], None).await.unwrap_err();
            assert!(err.is_transport());
        }
        assert_eq!(client.pool().available(), 1);
    }

    #[tokio::test]
    async fn exported_image_is_persisted() {
        let tmp = tempdir().unwrap();
        let behavior = FakeBehavior {
            result: ValidationResult {
                errors: Some(vec![]),
                image: Some(ImagePayload {
                    url: Some("data:image/png;base64,iVBORw0KGgo=".into()),
                    ..ImagePayload::default()
                }),
                ..ValidationResult::default()
            },
            ..FakeBehavior::default()
        };
        let client = ValidatorClient::new(FakeBackend::new(behavior), 1, settings(tmp.path()));
        let result = client.validate(vec![json!({})], None).await.unwrap();

        assert_eq!(result.image_source, Some(ImageSource::EngineExport));
        assert!(result.image.unwrap().path.unwrap().exists());
        assert_eq!(result.image_dir.as_deref(), client.artifacts().run_dir());
        assert!(result.error_log_path.is_some());
    }

    fn clean_render() -> FakeBehavior {
        FakeBehavior {
            result: ValidationResult {
                errors: Some(vec![]),
                action_errors: Some(vec![]),
                ..ValidationResult::default()
            },
            ..FakeBehavior::default()
        }
    }

    #[tokio::test]
    async fn unwritable_error_log_root_still_validates() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("errors"), b"not a dir").unwrap();
        let client = ValidatorClient::new(
            FakeBackend::new(clean_render()),
            1,
            ClientSettings {
                save_screenshots: false,
                ..settings(tmp.path())
            },
        );

        let result = client.validate(vec![json!({})], None).await.unwrap();
        assert!(result.is_success());
        assert!(result.error_log_path.is_none());

        let entry = ErrorLogEntry::transport_failure("Validator failed: x", None, vec![]);
        assert!(client.log_error(&entry).await.is_none());
        assert_eq!(client.pool().available(), 1);
    }

    #[tokio::test]
    async fn unwritable_screenshot_root_only_degrades_the_image() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("screenshots"), b"not a dir").unwrap();
        let client = ValidatorClient::new(FakeBackend::new(clean_render()), 1, settings(tmp.path()));

        let result = client.validate(vec![json!({})], None).await.unwrap();
        let errors = result.errors.as_ref().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, Some(ErrorStage::Fallback));
        assert!(errors[0].message.starts_with("Fallback screenshot failed"));
        assert!(result.image_dir.is_none());
        assert!(result.error_log_path.is_some());
        assert_eq!(client.pool().available(), 1);
    }

    #[tokio::test]
    async fn error_log_gets_one_line_per_call() {
        let tmp = tempdir().unwrap();
        let client = ValidatorClient::new(
            FakeBackend::new(FakeBehavior::default()),
            1,
            settings(tmp.path()),
        );
        let first = ErrorLogEntry::transport_failure("Validator failed: a", None, vec![]);
        let second = ErrorLogEntry::transport_failure("Validator failed: b", None, vec![]);
        let path = client.log_error(&first).await.unwrap();
        assert_eq!(client.log_error(&second).await.unwrap(), path);

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["errors"][0]["message"], "Validator failed: b");
    }
}
