//! Validation and scoring of model-generated drawing actions.
//!
//! A completion is parsed into an action list, replayed on a pooled renderer session through
//! the in-page validator bridge, and scored 1.0 when it renders without errors. Rendered
//! images and failures are persisted per run.

pub mod artifacts;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod image;
pub mod model;
pub mod parse;
pub mod pool;
pub mod postprocess;
pub mod scoring;
pub mod server;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use artifacts::{run_tag, ArtifactError, RunArtifacts};
pub use bridge::{
    fetch_response_schema, fetch_system_prompt, fetch_system_prompt_blocking, BridgeConfig,
    BridgeSession, CdpBackend,
};
pub use client::{ClientSettings, Validator, ValidatorClient};
pub use config::EvalConfig;
pub use error::ValidatorError;
pub use image::{decode_data_url, DecodedImage, ImageDecodeError};
pub use model::{
    Action, ChatMessage, ErrorEntry, ErrorLogEntry, ErrorStage, ImageFormat, ImagePayload,
    ImageSource, RenderOptions, ValidationResult,
};
pub use parse::{parse_response_json, ParseError};
pub use pool::{SessionLease, SessionPool};
pub use scoring::{latest_user_prompt, render_and_score, ScoreState};
pub use server::{RendererServer, ServerError, ServerOptions};
pub use session::{SessionBackend, ValidatorSession};
