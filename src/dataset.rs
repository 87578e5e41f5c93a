//! Prompt sets for evaluation runs: built-in theme examples and prompt files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    JsonLine {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("JSON input must be a list of strings or objects")]
    NotAList,
    #[error("failed to parse {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// Diagram family a built-in prompt belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Flowcharts,
    Architecture,
    Sequence,
    StateMachines,
}

struct ThemeExamples {
    theme: Theme,
    examples: [&'static str; 3],
}

const THEMES: [ThemeExamples; 4] = [
    ThemeExamples {
        theme: Theme::Flowcharts,
        examples: [
            "Draw a flowchart for a password reset flow with an expired-token error path.",
            "Create a flowchart for a checkout process that includes coupon validation and payment failure retry.",
            "Make a flowchart for an incident response runbook: detect → triage → mitigate → postmortem, with an escalation decision.",
        ],
    },
    ThemeExamples {
        theme: Theme::Architecture,
        examples: [
            "Draw a web app architecture with client, API, Redis queue, workers, and a Postgres database.",
            "Create an ML inference architecture: request API → feature store → model server → metrics/logging sink.",
            "Draw a CI/CD architecture: repo → CI runner → artifact store → deploy controller → cluster.",
        ],
    },
    ThemeExamples {
        theme: Theme::Sequence,
        examples: [
            "Draw a sequence diagram for login: client → API → auth DB → session store, then back to client.",
            "Create a sequence diagram for file upload: client, API, object storage, virus scanner, metadata DB.",
            "Draw a sequence diagram for data export: user triggers export, job is queued, worker generates file, user downloads.",
        ],
    },
    ThemeExamples {
        theme: Theme::StateMachines,
        examples: [
            "Draw a state machine for an order: created → paid → shipped → delivered, with cancel/return branches.",
            "Create a subscription lifecycle state machine: trial, active, past_due, canceled, resumed.",
            "Draw a job state machine: queued, running, succeeded, failed, retried.",
        ],
    },
];

/// The twelve built-in prompts, grouped by theme in a fixed order.
pub fn example_prompts() -> Vec<String> {
    THEMES
        .iter()
        .flat_map(|theme| theme.examples.iter().map(|example| example.to_string()))
        .collect()
}

pub fn examples_for(theme: Theme) -> Vec<&'static str> {
    THEMES
        .iter()
        .filter(|entry| entry.theme == theme)
        .flat_map(|entry| entry.examples)
        .collect()
}

/// Lowercase, collapse whitespace and drop punctuation so near-identical prompts compare equal.
pub fn normalize_prompt(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

/// Keep the first occurrence of each normalized prompt, preserving order.
pub fn dedupe_prompts(prompts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let before = prompts.len();
    let kept: Vec<String> = prompts
        .into_iter()
        .filter(|prompt| seen.insert(normalize_prompt(prompt)))
        .collect();
    debug!(before, after = kept.len(), "deduplicated prompts");
    kept
}

/// Load prompts by extension: `.jsonl` and `.json` (strings or objects carrying `field`),
/// `.csv` (column `field`), anything else one prompt per line. Blank prompts are skipped.
pub fn load_prompts(path: &Path, field: &str) -> Result<Vec<String>, DatasetError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if extension == "csv" {
        return load_csv(path, field);
    }

    let content = fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match extension.as_str() {
        "jsonl" => {
            let mut prompts = Vec::new();
            for (index, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let record: Value =
                    serde_json::from_str(line).map_err(|source| DatasetError::JsonLine {
                        path: path.to_path_buf(),
                        line: index + 1,
                        source,
                    })?;
                prompts.extend(prompt_from_record(&record, field));
            }
            Ok(prompts)
        }
        "json" => {
            let data: Value = serde_json::from_str(&content).map_err(|source| DatasetError::Json {
                path: path.to_path_buf(),
                source,
            })?;
            let items = data.as_array().ok_or(DatasetError::NotAList)?;
            Ok(items
                .iter()
                .filter_map(|item| prompt_from_record(item, field))
                .collect())
        }
        _ => Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
    }
}

fn prompt_from_record(record: &Value, field: &str) -> Option<String> {
    let text = match record {
        Value::String(text) => text.trim().to_string(),
        Value::Object(map) => match map.get(field) {
            None | Some(Value::Null) => return None,
            Some(Value::String(text)) => text.trim().to_string(),
            Some(other) => other.to_string(),
        },
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn load_csv(path: &Path, field: &str) -> Result<Vec<String>, DatasetError> {
    let csv_err = |source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let Some(column) = headers.iter().position(|header| header == field) else {
        return Ok(Vec::new());
    };

    let mut prompts = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        if let Some(value) = record.get(column).map(str::trim) {
            if !value.is_empty() {
                prompts.push(value.to_string());
            }
        }
    }
    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn built_in_examples_cover_every_theme() {
        let prompts = example_prompts();
        assert_eq!(prompts.len(), 12);
        assert!(prompts[0].starts_with("Draw a flowchart for a password reset"));
        assert_eq!(examples_for(Theme::StateMachines).len(), 3);
        assert_eq!(
            examples_for(Theme::Sequence)[0],
            prompts[6].as_str()
        );
    }

    #[test]
    fn normalization_ignores_case_spacing_and_punctuation() {
        assert_eq!(
            normalize_prompt("  Draw   a Flowchart,  please! "),
            "draw a flowchart please"
        );
        assert_eq!(normalize_prompt("state_machine"), "state_machine");
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let prompts = vec![
            "Draw a box.".to_string(),
            "draw a BOX".to_string(),
            "Draw a circle".to_string(),
        ];
        assert_eq!(
            dedupe_prompts(prompts),
            vec!["Draw a box.".to_string(), "Draw a circle".to_string()]
        );
    }

    #[test]
    fn loads_each_supported_format() {
        let tmp = tempdir().unwrap();

        let jsonl = tmp.path().join("prompts.jsonl");
        fs::write(
            &jsonl,
            "{\"prompt\": \" one \"}\n\n\"two\"\n{\"other\": 1}\n{\"prompt\": null}\n",
        )
        .unwrap();
        assert_eq!(load_prompts(&jsonl, "prompt").unwrap(), vec!["one", "two"]);

        let json = tmp.path().join("prompts.json");
        fs::write(&json, r#"[{"q": "alpha"}, "beta", 3]"#).unwrap();
        assert_eq!(load_prompts(&json, "q").unwrap(), vec!["alpha", "beta"]);

        let csv_path = tmp.path().join("prompts.csv");
        fs::write(&csv_path, "id,prompt\n1,first\n2,\n3,\"third, quoted\"\n").unwrap();
        assert_eq!(
            load_prompts(&csv_path, "prompt").unwrap(),
            vec!["first", "third, quoted"]
        );

        let txt = tmp.path().join("prompts.txt");
        fs::write(&txt, "a\n\n  b  \n").unwrap();
        assert_eq!(load_prompts(&txt, "prompt").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn json_object_input_is_rejected() {
        let tmp = tempdir().unwrap();
        let json = tmp.path().join("prompts.json");
        fs::write(&json, r#"{"prompt": "x"}"#).unwrap();
        assert!(matches!(
            load_prompts(&json, "prompt"),
            Err(DatasetError::NotAList)
        ));
    }
}
