//! Binary reward for a model completion: 1.0 when its actions render cleanly, else 0.0.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Validator;
use crate::model::{Action, ChatMessage, ErrorLogEntry, ErrorStage, ValidationResult};
use crate::parse::parse_response_json;

/// Per-rollout state the scorer reads from and writes to.
#[derive(Default)]
pub struct ScoreState {
    /// Last validation outcome, including synthesized parse/transport failures.
    pub render: Option<ValidationResult>,
    /// Actions of the last successful validation.
    pub actions: Option<Vec<Action>>,
    /// Validator to use when the caller does not pass one explicitly.
    pub validator: Option<Arc<dyn Validator>>,
}

impl ScoreState {
    pub fn with_validator(validator: Arc<dyn Validator>) -> Self {
        Self {
            validator: Some(validator),
            ..Self::default()
        }
    }
}

/// Content of the most recent user turn in `prompt`, if any.
pub fn latest_user_prompt(prompt: Option<&[ChatMessage]>) -> Option<Value> {
    prompt?
        .iter()
        .rev()
        .find(|message| message.role == "user")
        .map(|message| message.content.clone())
}

/// Score the last message of `completion`.
///
/// Every failure path records a [`ValidationResult`] in `state.render` and, when a validator is
/// available, appends an entry to its error log. Nothing is raised.
pub async fn render_and_score(
    completion: &[ChatMessage],
    state: &mut ScoreState,
    prompt: Option<&[ChatMessage]>,
    validator: Option<&dyn Validator>,
) -> f64 {
    let fallback = state.validator.clone();
    let validator = validator.or(fallback.as_deref());
    let user_prompt = latest_user_prompt(prompt);

    let Some(last) = completion.last() else {
        return parse_failure(state, validator, "Empty completion", user_prompt, "").await;
    };
    let response_text = last.text();

    let parsed = match parse_response_json(response_text) {
        Ok(value) => value,
        Err(err) => {
            return parse_failure(state, validator, &err.to_string(), user_prompt, response_text)
                .await;
        }
    };
    let Some(actions) = parsed.get("actions").and_then(Value::as_array).cloned() else {
        return parse_failure(
            state,
            validator,
            "Missing actions array",
            user_prompt,
            response_text,
        )
        .await;
    };

    let Some(validator) = validator else {
        state.render = Some(ValidationResult::failure(
            ErrorStage::Other,
            "Validator client not available",
        ));
        return 0.0;
    };

    let mut result = match validator.validate_actions(actions.clone()).await {
        Ok(result) => result,
        Err(err) => {
            let message = format!("Validator failed: {err}");
            warn!(target: "scoring", error = %err, "validator round-trip failed");
            let entry = ErrorLogEntry::transport_failure(message.clone(), user_prompt, actions);
            let mut render = ValidationResult::failure(ErrorStage::Other, message);
            render.error_log_path = validator.log_error(&entry).await;
            state.render = Some(render);
            return 0.0;
        }
    };

    if result.is_success() {
        debug!(target: "scoring", actions = actions.len(), "completion rendered cleanly");
        state.render = Some(result);
        state.actions = Some(actions);
        return 1.0;
    }

    if let Some(errors) = result.errors.as_ref().filter(|errors| !errors.is_empty()) {
        warn!(target: "scoring", ?errors, "validator errors");
    }
    if let Some(errors) = result.action_errors.as_ref().filter(|errors| !errors.is_empty()) {
        warn!(target: "scoring", ?errors, "validator action errors");
    }
    let entry = ErrorLogEntry::from_result(&result, user_prompt, actions);
    if let Some(path) = validator.log_error(&entry).await {
        result.error_log_path = Some(path);
    }
    state.render = Some(result);
    0.0
}

async fn parse_failure(
    state: &mut ScoreState,
    validator: Option<&dyn Validator>,
    message: &str,
    user_prompt: Option<Value>,
    raw_completion: &str,
) -> f64 {
    debug!(target: "scoring", %message, "completion rejected before validation");
    let mut render = ValidationResult::failure(ErrorStage::Parse, message);
    if let Some(validator) = validator {
        let entry = ErrorLogEntry::parse_failure(message, user_prompt, raw_completion);
        render.error_log_path = validator.log_error(&entry).await;
    }
    state.render = Some(render);
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidatorError;
    use crate::model::ErrorEntry;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::path::PathBuf;

    #[derive(Default)]
    struct ScriptedValidator {
        outcome: Mutex<Option<Result<ValidationResult, ValidatorError>>>,
        calls: Mutex<Vec<Vec<Action>>>,
        logged: Mutex<Vec<ErrorLogEntry>>,
    }

    impl ScriptedValidator {
        fn returning(outcome: Result<ValidationResult, ValidatorError>) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Validator for ScriptedValidator {
        async fn validate_actions(
            &self,
            actions: Vec<Action>,
        ) -> Result<ValidationResult, ValidatorError> {
            self.calls.lock().push(actions);
            self.outcome
                .lock()
                .take()
                .unwrap_or_else(|| Ok(ValidationResult::default()))
        }

        async fn log_error(&self, entry: &ErrorLogEntry) -> Option<PathBuf> {
            self.logged.lock().push(entry.clone());
            Some(PathBuf::from("errors.jsonl"))
        }
    }

    fn completion(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::assistant(text)]
    }

    #[tokio::test]
    async fn clean_render_scores_one() {
        let validator = ScriptedValidator::returning(Ok(ValidationResult {
            errors: Some(vec![]),
            ..ValidationResult::default()
        }));
        let mut state = ScoreState::default();
        let score = render_and_score(
            &completion(r#"{"actions":[{"type":"create"}]}"#),
            &mut state,
            None,
            Some(&validator),
        )
        .await;
        assert_eq!(score, 1.0);
        assert_eq!(state.actions, Some(vec![json!({"type": "create"})]));
        assert!(state.render.unwrap().is_success());
        assert!(validator.logged.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_actions_never_calls_validator() {
        let validator = ScriptedValidator::default();
        let prompt = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("draw a flowchart"),
        ];
        let mut state = ScoreState::default();
        let score = render_and_score(
            &completion(r#"{"shapes":[]}"#),
            &mut state,
            Some(&prompt),
            Some(&validator),
        )
        .await;
        assert_eq!(score, 0.0);
        assert!(validator.calls.lock().is_empty());

        let render = state.render.unwrap();
        assert_eq!(
            render.errors.unwrap()[0],
            ErrorEntry::new(Some(ErrorStage::Parse), "Missing actions array")
        );
        let logged = validator.logged.lock();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].user_prompt, Some(json!("draw a flowchart")));
        assert_eq!(logged[0].raw_completion.as_deref(), Some(r#"{"shapes":[]}"#));
        assert!(state.actions.is_none());
    }

    #[tokio::test]
    async fn empty_completion_scores_zero() {
        let validator = ScriptedValidator::default();
        let mut state = ScoreState::default();
        let score = render_and_score(&[], &mut state, None, Some(&validator)).await;
        assert_eq!(score, 0.0);
        assert_eq!(
            state.render.unwrap().errors.unwrap()[0].message,
            "Empty completion"
        );
    }

    #[tokio::test]
    async fn unparseable_completion_is_logged() {
        let validator = ScriptedValidator::default();
        let mut state = ScoreState::default();
        let score = render_and_score(
            &completion("I cannot draw that."),
            &mut state,
            None,
            Some(&validator),
        )
        .await;
        assert_eq!(score, 0.0);
        let render = state.render.unwrap();
        assert_eq!(render.errors.unwrap()[0].message, "Response does not contain JSON");
        assert_eq!(render.error_log_path, Some(PathBuf::from("errors.jsonl")));
    }

    #[tokio::test]
    async fn missing_validator_scores_zero() {
        let mut state = ScoreState::default();
        let score =
            render_and_score(&completion(r#"{"actions":[]}"#), &mut state, None, None).await;
        assert_eq!(score, 0.0);
        assert_eq!(
            state.render.unwrap().errors.unwrap()[0].message,
            "Validator client not available"
        );
    }

    #[tokio::test]
    async fn validator_errors_score_zero_and_log() {
        let validator = Arc::new(ScriptedValidator::returning(Ok(ValidationResult {
            action_errors: Some(vec![ErrorEntry::new(
                Some(ErrorStage::Validation),
                "unknown shape",
            )]),
            ..ValidationResult::default()
        })));
        let mut state = ScoreState::with_validator(validator.clone());
        let score =
            render_and_score(&completion(r#"{"actions":[{}]}"#), &mut state, None, None).await;
        assert_eq!(score, 0.0);
        let render = state.render.unwrap();
        assert_eq!(render.error_log_path, Some(PathBuf::from("errors.jsonl")));
        assert!(state.actions.is_none());

        let logged = validator.logged.lock();
        assert_eq!(logged[0].actions, Some(vec![json!({})]));
        assert_eq!(logged[0].action_errors.as_ref().unwrap()[0].message, "unknown shape");
    }

    #[tokio::test]
    async fn transport_failure_is_logged_with_prefix() {
        let validator = ScriptedValidator::returning(Err(ValidatorError::Bridge(
            "page crashed".into(),
        )));
        let mut state = ScoreState::default();
        let score = render_and_score(
            &completion(r#"{"actions":[]}"#),
            &mut state,
            None,
            Some(&validator),
        )
        .await;
        assert_eq!(score, 0.0);
        let message = state.render.unwrap().errors.unwrap()[0].message.clone();
        assert_eq!(message, "Validator failed: bridge error: page crashed");
        let logged = validator.logged.lock();
        assert_eq!(logged[0].stage, Some(ErrorStage::Other));
    }
}
