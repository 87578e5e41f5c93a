use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    #[error("timed out")]
    Timeout,
    #[error("browser launch failed")]
    Launch,
    #[error("browser connection failed")]
    Connection,
    #[error("unexpected protocol response")]
    Protocol,
    #[error("script threw")]
    Script,
}

/// Failure of a browser-level operation.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
#[error("{kind}{}", suffix(.detail))]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub detail: Option<String>,
    /// Whether repeating the same command may succeed.
    pub retriable: bool,
    /// Raw protocol payload, when there is one worth keeping.
    pub data: Option<Value>,
}

fn suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|detail| format!(": {detail}"))
        .unwrap_or_default()
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            detail: None,
            retriable: false,
            data: None,
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Timeout)
            .with_detail(detail)
            .retriable(true)
    }

    pub fn launch(detail: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Launch).with_detail(detail)
    }

    pub fn connection(detail: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Connection).with_detail(detail)
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Protocol).with_detail(detail)
    }

    pub fn script(detail: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Script).with_detail(detail)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == AdapterErrorKind::Timeout
    }
}
