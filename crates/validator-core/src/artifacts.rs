//! Run-scoped output locations: screenshot directory and JSONL error log.

use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

static RUN_TAG: OnceCell<String> = OnceCell::new();

/// Process-wide run identifier, `run_<YYYYMMDD_HHMMSS>_<8 hex>` in UTC. Computed once.
pub fn run_tag() -> &'static str {
    RUN_TAG.get_or_init(|| {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "run_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        )
    })
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Lazily created per-run directories. All paths are stable for the life of the value.
#[derive(Debug)]
pub struct RunArtifacts {
    screenshot_root: PathBuf,
    error_log_root: PathBuf,
    save_screenshots: bool,
    log_errors: bool,
    run_dir: OnceCell<PathBuf>,
    error_log: OnceCell<PathBuf>,
    append_lock: Mutex<()>,
}

impl RunArtifacts {
    pub fn new(
        screenshot_root: impl Into<PathBuf>,
        error_log_root: impl Into<PathBuf>,
        save_screenshots: bool,
        log_errors: bool,
    ) -> Self {
        Self {
            screenshot_root: screenshot_root.into(),
            error_log_root: error_log_root.into(),
            save_screenshots,
            log_errors,
            run_dir: OnceCell::new(),
            error_log: OnceCell::new(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn run_tag(&self) -> &'static str {
        run_tag()
    }

    /// Create whatever directories the enabled features need. Each is attempted even when
    /// the other fails; the first error is returned.
    pub fn prepare(&self) -> Result<(), ArtifactError> {
        let screenshots = if self.save_screenshots {
            self.ensure_run_dir().map(|_| ())
        } else {
            Ok(())
        };
        let errors = if self.log_errors {
            self.ensure_error_log_path().map(|_| ())
        } else {
            Ok(())
        };
        screenshots.and(errors)
    }

    /// `<screenshot_root>/<run_tag>`, once created.
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.get().map(PathBuf::as_path)
    }

    /// `<error_log_root>/<run_tag>/errors.jsonl`, once its directory exists.
    pub fn error_log_path(&self) -> Option<&Path> {
        self.error_log.get().map(PathBuf::as_path)
    }

    pub fn ensure_run_dir(&self) -> Result<&Path, ArtifactError> {
        self.run_dir
            .get_or_try_init(|| {
                let dir = self.screenshot_root.join(run_tag());
                create_dir(&dir)?;
                debug!(target: "validator-client", dir = %dir.display(), "screenshot run dir ready");
                Ok(dir)
            })
            .map(PathBuf::as_path)
    }

    pub fn ensure_error_log_path(&self) -> Result<&Path, ArtifactError> {
        self.error_log
            .get_or_try_init(|| {
                let dir = self.error_log_root.join(run_tag());
                create_dir(&dir)?;
                Ok(dir.join("errors.jsonl"))
            })
            .map(PathBuf::as_path)
    }

    /// Fresh `render_<uuid>.<ext>` path inside the run dir (or the screenshot root when
    /// screenshots are disabled).
    pub fn screenshot_path(&self, extension: &str) -> Result<PathBuf, ArtifactError> {
        let dir = if self.save_screenshots {
            self.ensure_run_dir()?.to_path_buf()
        } else {
            create_dir(&self.screenshot_root)?;
            self.screenshot_root.clone()
        };
        let name = format!("render_{}.{}", Uuid::new_v4().simple(), extension);
        Ok(dir.join(name))
    }

    /// Append one JSON line to the error log. Returns `None` when logging is disabled.
    ///
    /// Concurrent callers are serialized so lines never interleave.
    pub async fn append_error<T: Serialize>(
        &self,
        entry: &T,
    ) -> Result<Option<PathBuf>, ArtifactError> {
        if !self.log_errors {
            return Ok(None);
        }
        let path = self.ensure_error_log_path()?.to_path_buf();
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;
        file.write_all(&line)
            .await
            .map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;
        file.flush().await.map_err(|source| ArtifactError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(Some(path))
    }
}

fn create_dir(dir: &Path) -> Result<(), ArtifactError> {
    std::fs::create_dir_all(dir).map_err(|source| ArtifactError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn run_tag_is_stable_and_well_formed() {
        let first = run_tag();
        let second = run_tag();
        assert_eq!(first, second);
        assert!(first.starts_with("run_"));
        let parts: Vec<&str> = first.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn run_tag_clock_is_utc() {
        let tag = run_tag();
        let stamp = &tag["run_".len().."run_YYYYmmdd_HHMMSS".len()];
        let tagged = chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").unwrap();
        let now = Utc::now().naive_utc();
        assert!(tagged <= now);
        assert!(now - tagged < chrono::Duration::hours(1));
    }

    #[test]
    fn blocked_screenshot_root_still_prepares_error_log() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("shots"), b"file").unwrap();
        let artifacts = RunArtifacts::new(
            tmp.path().join("shots"),
            tmp.path().join("errors"),
            true,
            true,
        );
        assert!(matches!(
            artifacts.prepare(),
            Err(ArtifactError::CreateDir { .. })
        ));
        assert!(artifacts.run_dir().is_none());
        assert!(artifacts.error_log_path().is_some());
    }

    #[test]
    fn directories_are_run_scoped() {
        let tmp = tempdir().unwrap();
        let artifacts = RunArtifacts::new(
            tmp.path().join("shots"),
            tmp.path().join("errors"),
            true,
            true,
        );
        assert!(artifacts.run_dir().is_none());
        artifacts.prepare().unwrap();

        let run_dir = artifacts.run_dir().unwrap();
        assert_eq!(run_dir, tmp.path().join("shots").join(run_tag()));
        assert!(run_dir.is_dir());
        assert_eq!(
            artifacts.error_log_path().unwrap(),
            tmp.path().join("errors").join(run_tag()).join("errors.jsonl")
        );

        let shot = artifacts.screenshot_path("png").unwrap();
        assert_eq!(shot.parent().unwrap(), run_dir);
        let name = shot.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("render_") && name.ends_with(".png"));
        assert_ne!(shot, artifacts.screenshot_path("png").unwrap());
    }

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let tmp = tempdir().unwrap();
        let artifacts = RunArtifacts::new(tmp.path().join("s"), tmp.path().join("e"), false, true);
        let first = artifacts.append_error(&json!({"n": 1})).await.unwrap();
        let second = artifacts.append_error(&json!({"n": 2})).await.unwrap();
        assert_eq!(first, second);

        let content = std::fs::read_to_string(first.unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![r#"{"n":1}"#, r#"{"n":2}"#]);
        assert!(artifacts.run_dir().is_none());
    }

    #[tokio::test]
    async fn disabled_logging_writes_nothing() {
        let tmp = tempdir().unwrap();
        let artifacts = RunArtifacts::new(tmp.path().join("s"), tmp.path().join("e"), false, false);
        assert!(artifacts.append_error(&json!({})).await.unwrap().is_none());
        assert!(!tmp.path().join("e").exists());
    }
}
