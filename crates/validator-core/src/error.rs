use cdp_adapter::AdapterError;
use thiserror::Error;

use crate::artifacts::ArtifactError;

/// Failures of the validator machinery itself, as opposed to validation findings reported by
/// the bridge (those travel inside [`crate::ValidationResult`]).
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("renderer startup failed: {0}")]
    Startup(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("bridge returned a malformed result: {0}")]
    MalformedResult(#[from] serde_json::Error),
    #[error("bridge error: {0}")]
    Bridge(String),
    #[error("session pool is closed")]
    PoolClosed,
    #[error("validation task aborted: {0}")]
    TaskAborted(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to fetch system prompt. {0}")]
    SystemPrompt(String),
}

impl ValidatorError {
    /// True when the failure came from talking to the renderer (transport, timeout, crash)
    /// rather than from local bookkeeping.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ValidatorError::Adapter(_)
                | ValidatorError::Bridge(_)
                | ValidatorError::MalformedResult(_)
                | ValidatorError::Startup(_)
        )
    }
}
