//! Everything a training or evaluation harness needs for one run: the renderer's system
//! prompt, the prompt dataset and a shared validator client.

use std::sync::Arc;

use serde::Serialize;
use validator_core::{
    fetch_system_prompt_blocking, BridgeConfig, CdpBackend, ChatMessage, EvalConfig,
    RendererServer, ValidatorClient, ValidatorError,
};

use crate::dataset::example_prompts;

/// One dataset row in chat form.
#[derive(Clone, Debug, Serialize)]
pub struct PromptRow {
    pub question: String,
    pub prompt: Vec<ChatMessage>,
}

pub struct EvalEnvironment {
    pub system_prompt: String,
    pub rows: Vec<PromptRow>,
    pub validator: Arc<ValidatorClient<CdpBackend>>,
}

impl EvalEnvironment {
    /// Build the environment over the built-in examples.
    ///
    /// Blocks while the system prompt is fetched; safe to call from inside a tokio runtime.
    pub fn load(config: &EvalConfig) -> Result<Self, ValidatorError> {
        Self::load_with(config, example_prompts(), None)
    }

    pub fn load_with(
        config: &EvalConfig,
        questions: Vec<String>,
        server: Option<Arc<RendererServer>>,
    ) -> Result<Self, ValidatorError> {
        let bridge = BridgeConfig::from_eval_config(config);
        let system_prompt = fetch_system_prompt_blocking(bridge.clone())?;
        let rows = build_rows(&system_prompt, questions);

        let mut backend = CdpBackend::new(bridge);
        if let Some(server) = server {
            backend = backend.with_server(server);
        }
        let validator = ValidatorClient::new(backend, config.pool_size, config.client_settings());

        Ok(Self {
            system_prompt,
            rows,
            validator: Arc::new(validator),
        })
    }
}

pub fn build_rows(system_prompt: &str, questions: Vec<String>) -> Vec<PromptRow> {
    questions
        .into_iter()
        .map(|question| PromptRow {
            prompt: vec![
                ChatMessage::new("system", system_prompt),
                ChatMessage::user(question.clone()),
            ],
            question,
        })
        .collect()
}
