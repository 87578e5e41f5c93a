//! Persist the rendered image for a validation result, falling back to a page screenshot.
//!
//! Nothing here fails the validation: problems are appended to `result.errors` with stage
//! `export` or `fallback`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::artifacts::RunArtifacts;
use crate::image::decode_data_url;
use crate::model::{ErrorStage, ImageSource, ValidationResult};
use crate::session::ValidatorSession;

enum Export {
    Written(PathBuf),
    Failed(String),
    Skipped,
}

pub async fn resolve_image(
    result: &mut ValidationResult,
    session: &dyn ValidatorSession,
    artifacts: &RunArtifacts,
    save_screenshots: bool,
    screenshot_path: Option<&Path>,
) {
    let data_url = result.image.as_ref().map(|image| image.url.clone());
    let export = match data_url {
        Some(data_url) => {
            export_embedded(
                data_url.as_deref(),
                artifacts,
                save_screenshots,
                screenshot_path,
            )
            .await
        }
        None => Export::Skipped,
    };

    match export {
        Export::Written(path) => {
            if let Some(image) = result.image.as_mut() {
                image.url = None;
                image.path = Some(path);
            }
            result.image_source = Some(ImageSource::EngineExport);
        }
        Export::Failed(message) => {
            warn!(target: "validator-client", %message, "image export failed");
            result.push_error(ErrorStage::Export, message);
        }
        Export::Skipped => {}
    }

    if save_screenshots && result.image_source.is_none() {
        capture_fallback(result, session, artifacts, screenshot_path).await;
    }

    if let Some(dir) = artifacts.run_dir() {
        result.image_dir = Some(dir.to_path_buf());
    }
    if let Some(path) = artifacts.error_log_path() {
        result.error_log_path = Some(path.to_path_buf());
    }
}

async fn export_embedded(
    data_url: Option<&str>,
    artifacts: &RunArtifacts,
    save_screenshots: bool,
    screenshot_path: Option<&Path>,
) -> Export {
    if let Some(target) = screenshot_path {
        let decoded = data_url.map(decode_data_url);
        return match decoded {
            Some(Ok(image)) => match write_bytes(target, &image.bytes).await {
                Ok(()) => Export::Written(target.to_path_buf()),
                Err(err) => {
                    debug!(target: "validator-client", error = %err, path = %target.display(), "write failed");
                    Export::Failed("Image export failed: unable to save data URL".into())
                }
            },
            _ => Export::Failed("Image export failed: unable to save data URL".into()),
        };
    }

    if !save_screenshots {
        return Export::Skipped;
    }
    let Some(data_url) = data_url else {
        return Export::Failed("Image export failed: missing data URL".into());
    };
    let image = match decode_data_url(data_url) {
        Ok(image) => image,
        Err(err) => {
            debug!(target: "validator-client", error = %err, "undecodable export payload");
            return Export::Failed("Image export failed: unsupported data URL".into());
        }
    };
    let target = match artifacts.screenshot_path(&image.extension) {
        Ok(path) => path,
        Err(err) => return Export::Failed(format!("Image export failed: {err}")),
    };
    match write_bytes(&target, &image.bytes).await {
        Ok(()) => Export::Written(target),
        Err(err) => Export::Failed(format!("Image export failed: {err}")),
    }
}

async fn capture_fallback(
    result: &mut ValidationResult,
    session: &dyn ValidatorSession,
    artifacts: &RunArtifacts,
    screenshot_path: Option<&Path>,
) {
    let target = match screenshot_path {
        Some(path) => Ok(path.to_path_buf()),
        None => artifacts.screenshot_path("png").map_err(|err| err.to_string()),
    };
    let outcome = match target {
        Ok(target) => session
            .capture_page(&target)
            .await
            .map(|()| target)
            .map_err(|err| err.to_string()),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(path) => {
            let image = result.image.get_or_insert_with(Default::default);
            image.path = Some(path);
            result.image_source = Some(ImageSource::PageScreenshot);
        }
        Err(err) => {
            warn!(target: "validator-client", error = %err, "fallback screenshot failed");
            result.push_error(
                ErrorStage::Fallback,
                format!("Fallback screenshot failed: {err}"),
            );
        }
    }
}

async fn write_bytes(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(target, bytes).await
}
