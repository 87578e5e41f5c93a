use std::path::Path;

use async_trait::async_trait;

use crate::error::ValidatorError;
use crate::model::{Action, RenderOptions, ValidationResult};

/// One isolated renderer instance with the bridge loaded.
#[async_trait]
pub trait ValidatorSession: Send + Sync {
    /// Clear the canvas so the next validation starts from an empty document.
    async fn reset(&self) -> Result<(), ValidatorError>;

    async fn validate(
        &self,
        actions: &[Action],
        options: Option<&RenderOptions>,
    ) -> Result<ValidationResult, ValidatorError>;

    /// Write a full-page screenshot of the current document to `target`.
    async fn capture_page(&self, target: &Path) -> Result<(), ValidatorError>;

    async fn close(&self) -> Result<(), ValidatorError>;
}

/// Produces sessions for a [`crate::SessionPool`] and owns whatever they share
/// (browser process, dev server).
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    type Session: ValidatorSession + 'static;

    async fn open_session(&self) -> Result<Self::Session, ValidatorError>;

    /// Release shared resources after every session has been closed.
    async fn shutdown(&self) -> Result<(), ValidatorError>;
}
