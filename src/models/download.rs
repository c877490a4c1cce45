//! Model artifact download helpers

use crate::error::OcrError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Upper bound on a single downloaded artifact
const MAX_ARTIFACT_BYTES: u64 = 512 * 1024 * 1024;

/// Cache directory for downloaded artifacts
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ocr-inference-engine")
}

/// Last path segment of `url`, without the query
fn cache_file_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("model.bin")
        .split('?')
        .next()
        .unwrap_or("model.bin")
        .to_string()
}

/// Cache location of the artifact at `url`: `<cache>/<url hash>/<file name>`.
///
/// The file name is kept so consumers that look artifacts up by name (tessdata)
/// still find them; the directory keeps equal names from different URLs apart.
fn cache_path(root: &Path, url: &str) -> PathBuf {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    root.join(&digest[..16]).join(cache_file_name(url))
}

/// Ensure the artifact at `url` is downloaded and return its path
pub fn ensure_downloaded(url: &str) -> Result<PathBuf, OcrError> {
    let path = cache_path(&cache_dir(), url);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| {
            OcrError::ModelLoadError(format!("Failed to create cache directory: {}", e))
        })?;
    }

    if !path.exists() {
        tracing::info!("Downloading {} (this may take a moment)...", url);
        download_file(url, &path)?;
        tracing::info!("Downloaded {} to {:?}", url, path);
    } else {
        tracing::info!("Using cached artifact from {:?}", path);
    }

    Ok(path)
}

/// Download a file from URL to path using ureq
fn download_file(url: &str, path: &Path) -> Result<(), OcrError> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| OcrError::ModelLoadError(format!("Failed to download {}: {}", url, e)))?;

    let buffer = response
        .into_body()
        .with_config()
        .limit(MAX_ARTIFACT_BYTES)
        .read_to_vec()
        .map_err(|e| {
        OcrError::ModelLoadError(format!("Failed to read response body: {}", e))
    })?;

    // The cached path only ever holds a complete download
    let partial = path.with_extension("partial");
    let mut file = File::create(&partial)
        .map_err(|e| OcrError::ModelLoadError(format!("Failed to create model file: {}", e)))?;
    file.write_all(&buffer)
        .map_err(|e| OcrError::ModelLoadError(format!("Failed to write model file: {}", e)))?;
    std::fs::rename(&partial, path)
        .map_err(|e| OcrError::ModelLoadError(format!("Failed to move model file: {}", e)))?;

    Ok(())
}
