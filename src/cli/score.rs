use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator_core::{
    render_and_score, Action, ChatMessage, ErrorLogEntry, ScoreState, ValidationResult, Validator,
    ValidatorError,
};

use super::context::{CliContext, EvalClient};
use super::output::{render, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ScoreArgs {
    /// Completion file: a JSON array of chat messages, or the raw assistant reply
    #[arg(long, value_name = "FILE")]
    pub completion: PathBuf,

    /// Prompt file: a JSON array of chat messages
    #[arg(long, value_name = "FILE")]
    pub prompt: Option<PathBuf>,

    /// Save the rendered image at this path instead of the run directory
    #[arg(long, value_name = "PATH")]
    pub screenshot: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct ScoreBatchArgs {
    /// JSONL file with one `{"prompt": [...], "completion": [...]}` object per line
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Rows scored at once (defaults to the pool size)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Write per-row results as JSONL
    #[arg(long, value_name = "FILE")]
    pub results: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ScoreReport {
    score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    actions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    render: Option<ValidationResult>,
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    #[serde(default)]
    prompt: Vec<ChatMessage>,
    completion: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct RowResult {
    index: usize,
    score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    render: Option<ValidationResult>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
}

/// Routes every validation of one score run to a caller-chosen image path.
struct PinnedScreenshot {
    client: Arc<EvalClient>,
    path: PathBuf,
}

#[async_trait]
impl Validator for PinnedScreenshot {
    async fn validate_actions(
        &self,
        actions: Vec<Action>,
    ) -> Result<ValidationResult, ValidatorError> {
        self.client.validate(actions, Some(self.path.clone())).await
    }

    async fn log_error(&self, entry: &ErrorLogEntry) -> Option<PathBuf> {
        self.client.append_error_log(entry).await
    }
}

pub async fn cmd_score(args: ScoreArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let completion = read_completion(&args.completion)?;
    let prompt = match &args.prompt {
        Some(path) => Some(read_messages(path)?),
        None => None,
    };

    let client = ctx.client().await?;
    let validator: Arc<dyn Validator> = match args.screenshot {
        Some(path) => Arc::new(PinnedScreenshot { client, path }),
        None => client,
    };

    let mut state = ScoreState::with_validator(validator);
    let score = render_and_score(&completion, &mut state, prompt.as_deref(), None).await;
    info!(score, "scored completion");

    let report = ScoreReport {
        score,
        actions: state.actions.as_ref().map(Vec::len),
        render: state.render,
    };
    match format {
        OutputFormat::Human => print_human_report(&report),
        _ => println!("{}", render(format, &report)?),
    }
    Ok(())
}

fn print_human_report(report: &ScoreReport) {
    println!("score: {:.1}", report.score);
    if let Some(count) = report.actions {
        println!("actions: {count}");
    }
    let Some(result) = &report.render else {
        return;
    };
    if let Some(path) = result.image.as_ref().and_then(|image| image.path.as_ref()) {
        println!("image: {}", path.display());
    }
    for message in result.error_messages() {
        println!("error: {message}");
    }
    if let Some(path) = &result.error_log_path {
        println!("error log: {}", path.display());
    }
}

pub async fn cmd_score_batch(
    args: ScoreBatchArgs,
    ctx: &CliContext,
    format: OutputFormat,
) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let rows = parse_batch(&content);
    let concurrency = args.concurrency.unwrap_or(ctx.config().pool_size).max(1);
    info!(rows = rows.len(), concurrency, "scoring batch");

    let client = ctx.client().await?;
    let mut results: Vec<RowResult> = stream::iter(rows)
        .map(|(index, row)| {
            let client = Arc::clone(&client);
            async move { score_row(index, row, client).await }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    results.sort_by_key(|result| result.index);

    if let Some(path) = &args.results {
        write_results(path, &results).await?;
        info!(path = %path.display(), "wrote batch results");
    }

    let scores: Vec<f64> = results.iter().map(|result| result.score).collect();
    let summary = summarize(&scores);
    match format {
        OutputFormat::Human => println!(
            "total: {}  passed: {}  failed: {}  pass rate: {:.3}",
            summary.total, summary.passed, summary.failed, summary.pass_rate
        ),
        _ => println!("{}", render(format, &summary)?),
    }
    Ok(())
}

async fn score_row(
    index: usize,
    row: Result<BatchRow, String>,
    client: Arc<EvalClient>,
) -> RowResult {
    let row = match row {
        Ok(row) => row,
        Err(error) => {
            return RowResult {
                index,
                score: 0.0,
                error: Some(error),
                render: None,
            }
        }
    };
    let mut state = ScoreState::with_validator(client);
    let score = render_and_score(&row.completion, &mut state, Some(row.prompt.as_slice()), None).await;
    RowResult {
        index,
        score,
        error: None,
        render: state.render,
    }
}

/// Non-blank lines in file order. Unparsable lines stay in the batch and score zero.
fn parse_batch(content: &str) -> Vec<(usize, Result<BatchRow, String>)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            let row = serde_json::from_str::<BatchRow>(line).map_err(|err| {
                warn!(line = number + 1, error = %err, "invalid batch row");
                format!("line {}: {err}", number + 1)
            });
            (number + 1, row)
        })
        .collect()
}

async fn write_results(path: &Path, results: &[RowResult]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut body = String::new();
    for result in results {
        body.push_str(&serde_json::to_string(result)?);
        body.push('\n');
    }
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn summarize(scores: &[f64]) -> BatchSummary {
    let total = scores.len();
    let passed = scores.iter().filter(|score| **score >= 1.0).count();
    let pass_rate = if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64
    };
    BatchSummary {
        total,
        passed,
        failed: total - passed,
        pass_rate,
    }
}

/// A chat array, or the whole file as one assistant reply.
fn read_completion(path: &Path) -> Result<Vec<ChatMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(completion_from_text(&content))
}

fn completion_from_text(content: &str) -> Vec<ChatMessage> {
    match serde_json::from_str::<Vec<ChatMessage>>(content) {
        Ok(messages) => messages,
        Err(_) => vec![ChatMessage::assistant(content)],
    }
}

fn read_messages(path: &Path) -> Result<Vec<ChatMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of chat messages", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_arrays_and_raw_text_are_both_completions() {
        let chat = completion_from_text(r#"[{"role": "assistant", "content": "{\"actions\": []}"}]"#);
        assert_eq!(chat, vec![ChatMessage::assistant(r#"{"actions": []}"#)]);

        let raw = completion_from_text("```json\n{\"actions\": []}\n```");
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].role, "assistant");
        assert!(raw[0].text().starts_with("```json"));

        // a JSON object is a reply, not a conversation
        let object = completion_from_text(r#"{"actions": []}"#);
        assert_eq!(object[0].text(), r#"{"actions": []}"#);
    }

    #[test]
    fn batch_rows_keep_line_numbers_and_bad_lines() {
        let content = concat!(
            r#"{"prompt": [{"role": "user", "content": "box"}], "completion": [{"role": "assistant", "content": "{}"}]}"#,
            "\n\n",
            "not json\n",
            r#"{"completion": []}"#,
            "\n"
        );
        let rows = parse_batch(content);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[0].1.as_ref().unwrap().prompt.len(), 1);
        assert_eq!(rows[1].0, 3);
        assert!(rows[1].1.as_ref().unwrap_err().starts_with("line 3:"));
        assert!(rows[2].1.as_ref().unwrap().prompt.is_empty());
    }

    #[test]
    fn summary_counts_only_perfect_scores() {
        assert_eq!(
            summarize(&[1.0, 0.0, 1.0, 0.0]),
            BatchSummary {
                total: 4,
                passed: 2,
                failed: 2,
                pass_rate: 0.5,
            }
        );
        assert_eq!(summarize(&[]).pass_rate, 0.0);
    }

    #[tokio::test]
    async fn results_file_is_jsonl_in_row_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/results.jsonl");
        let results = vec![
            RowResult {
                index: 1,
                score: 1.0,
                error: None,
                render: Some(ValidationResult::default()),
            },
            RowResult {
                index: 2,
                score: 0.0,
                error: Some("line 2: bad".into()),
                render: None,
            },
        ];
        write_results(&path, &results).await.unwrap();

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["index"], 1);
        assert_eq!(lines[1]["error"], "line 2: bad");
        assert!(lines[1].get("render").is_none());
    }
}
