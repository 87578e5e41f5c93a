//! Data exchanged with the renderer bridge and written to the error log.

use std::fmt;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A single drawing action. Its schema is owned by the renderer, so it stays opaque here.
pub type Action = Value;

/// Pipeline stage an error was raised in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    Parse,
    Export,
    Fallback,
    Validation,
    Other,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Parse => "parse",
            ErrorStage::Export => "export",
            ErrorStage::Fallback => "fallback",
            ErrorStage::Validation => "validation",
            ErrorStage::Other => "other",
        }
    }
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ErrorStage {
    fn from(value: &str) -> Self {
        match value {
            "parse" => ErrorStage::Parse,
            "export" => ErrorStage::Export,
            "fallback" => ErrorStage::Fallback,
            "validation" => ErrorStage::Validation,
            _ => ErrorStage::Other,
        }
    }
}

impl Serialize for ErrorStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ErrorStage::from(raw.as_str()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ErrorStage>,
    #[serde(default)]
    pub message: String,
    /// Bridge-specific detail (action index, shape id, ...).
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl ErrorEntry {
    pub fn new(stage: Option<ErrorStage>, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            details: Map::new(),
        }
    }
}

/// Rendered image reference. The bridge fills `url` with a data URL; post-processing replaces
/// it with `path` once the bytes are on disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Bytes came from the renderer's own image export.
    EngineExport,
    /// Bytes came from a full-page browser screenshot.
    PageScreenshot,
}

/// Outcome of one validation round-trip.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorEntry>>,
    #[serde(
        default,
        alias = "actionErrors",
        skip_serializing_if = "Option::is_none"
    )]
    pub action_errors: Option<Vec<ErrorEntry>>,
    #[serde(
        default,
        deserialize_with = "object_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub image: Option<ImagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<ImageSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_log_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ValidationResult {
    /// A result carrying exactly one error and nothing else.
    pub fn failure(stage: ErrorStage, message: impl Into<String>) -> Self {
        Self {
            errors: Some(vec![ErrorEntry::new(Some(stage), message)]),
            ..Self::default()
        }
    }

    /// Success means both error lists are absent or empty.
    pub fn is_success(&self) -> bool {
        self.errors.as_ref().map_or(true, Vec::is_empty)
            && self.action_errors.as_ref().map_or(true, Vec::is_empty)
    }

    pub fn push_error(&mut self, stage: ErrorStage, message: impl Into<String>) {
        self.errors
            .get_or_insert_with(Vec::new)
            .push(ErrorEntry::new(Some(stage), message));
    }

    pub fn error_messages(&self) -> impl Iterator<Item = &str> {
        self.errors
            .iter()
            .flatten()
            .chain(self.action_errors.iter().flatten())
            .map(|entry| entry.message.as_str())
    }
}

fn object_or_none<'de, D>(deserializer: D) -> Result<Option<ImagePayload>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(value @ Value::Object(_)) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// Optional rendering parameters forwarded verbatim to the bridge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark_mode: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Svg,
}

/// One chat turn. `content` is kept as raw JSON because providers disagree on its shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Text content, or `""` when the content is not a plain string.
    pub fn text(&self) -> &str {
        self.content.as_str().unwrap_or_default()
    }
}

/// One JSON line of the per-run error log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ErrorStage>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_errors: Option<Vec<ErrorEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<ImageSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_completion: Option<String>,
}

impl ErrorLogEntry {
    fn empty() -> Self {
        Self {
            timestamp: utc_timestamp(),
            stage: None,
            errors: Vec::new(),
            action_errors: None,
            user_prompt: None,
            actions: None,
            image: None,
            image_dir: None,
            image_source: None,
            raw_completion: None,
        }
    }

    /// The completion could not be turned into an action list.
    pub fn parse_failure(
        message: impl Into<String>,
        user_prompt: Option<Value>,
        raw_completion: impl Into<String>,
    ) -> Self {
        Self {
            stage: Some(ErrorStage::Parse),
            errors: vec![ErrorEntry::new(Some(ErrorStage::Parse), message)],
            user_prompt,
            raw_completion: Some(raw_completion.into()),
            ..Self::empty()
        }
    }

    /// The round-trip to the renderer failed before producing a result.
    pub fn transport_failure(
        message: impl Into<String>,
        user_prompt: Option<Value>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            stage: Some(ErrorStage::Other),
            errors: vec![ErrorEntry::new(Some(ErrorStage::Other), message)],
            user_prompt,
            actions: Some(actions),
            ..Self::empty()
        }
    }

    /// The bridge produced a result that carries errors.
    pub fn from_result(
        result: &ValidationResult,
        user_prompt: Option<Value>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            errors: result.errors.clone().unwrap_or_default(),
            action_errors: result.action_errors.clone(),
            user_prompt,
            actions: Some(actions),
            image: result.image.clone(),
            image_dir: result.image_dir.clone(),
            image_source: result.image_source,
            ..Self::empty()
        }
    }
}

/// ISO-8601 UTC timestamp with a `Z` suffix.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
