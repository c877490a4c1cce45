//! Model artifacts and the loaded model set
//!
//! A [`ModelSet`] owns the detection, recognition and optional angle
//! classification sessions plus the charset. It is created once per
//! successful primary initialization and released by dropping it.

pub mod download;

use crate::error::OcrError;
use crate::progress::ProgressSender;
use crate::session::{InferenceSession, SessionLoader, SessionOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Artifacts smaller than this are most likely placeholder files
pub const MIN_PLAUSIBLE_MODEL_BYTES: u64 = 16 * 1024;

/// Where a model artifact comes from: a local path or an http(s) URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelSource {
    Path(PathBuf),
    Url(String),
}

impl From<String> for ModelSource {
    fn from(s: String) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::Url(s)
        } else {
            Self::Path(PathBuf::from(s))
        }
    }
}

impl From<ModelSource> for String {
    fn from(source: ModelSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Url(u) => f.write_str(u),
        }
    }
}

impl ModelSource {
    /// Local path of the artifact, downloading it into the cache if needed
    pub fn resolve(&self) -> Result<PathBuf, OcrError> {
        match self {
            Self::Path(path) => {
                if path.exists() {
                    Ok(path.clone())
                } else {
                    Err(OcrError::ModelLoadError(format!(
                        "Model artifact not found: {}",
                        path.display()
                    )))
                }
            }
            Self::Url(url) => download::ensure_downloaded(url),
        }
    }
}

/// Locations of every artifact the primary pipeline needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSources {
    pub detection: ModelSource,
    pub recognition: ModelSource,
    #[serde(default)]
    pub angle: Option<ModelSource>,
    pub charset: ModelSource,
}

impl ModelSources {
    /// Conventional file names inside a model directory
    pub fn from_dir(dir: &Path) -> Self {
        let angle = dir.join("angle.onnx");
        Self {
            detection: ModelSource::Path(dir.join("detection.onnx")),
            recognition: ModelSource::Path(dir.join("recognition.onnx")),
            angle: angle.exists().then_some(ModelSource::Path(angle)),
            charset: ModelSource::Path(dir.join("charset.txt")),
        }
    }
}

/// Ordered recognition symbols. Class index `len()` (the last model class)
/// is the implicit CTC blank.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Charset {
    symbols: Vec<String>,
}

impl Charset {
    pub fn from_symbols(symbols: impl IntoIterator<Item = String>) -> Self {
        Self {
            symbols: symbols.into_iter().collect(),
        }
    }

    /// Parse a charset file: one symbol per line. A line holding a single
    /// space is the space symbol; empty lines are skipped.
    pub fn parse(contents: &str) -> Self {
        Self::from_symbols(
            contents
                .lines()
                .map(|line| line.strip_suffix('\r').unwrap_or(line))
                .filter(|line| !line.is_empty())
                .map(|line| line.to_string()),
        )
    }

    pub fn load(path: &Path) -> Result<Self, OcrError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            OcrError::ModelLoadError(format!("Failed to read charset {}: {}", path.display(), e))
        })?;
        let charset = Self::parse(&contents);
        if charset.is_empty() {
            return Err(OcrError::ModelLoadError(format!(
                "Charset {} is empty",
                path.display()
            )));
        }
        Ok(charset)
    }

    pub fn symbol(&self, index: usize) -> Option<&str> {
        self.symbols.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Warn when an artifact is implausibly small. Never blocks loading.
pub fn check_artifact_size(path: &Path) -> Result<Option<String>, OcrError> {
    let metadata = fs::metadata(path).map_err(|e| {
        OcrError::ModelLoadError(format!("Cannot stat {}: {}", path.display(), e))
    })?;

    if metadata.len() < MIN_PLAUSIBLE_MODEL_BYTES {
        let warning = format!(
            "Model {} is only {} bytes and may be a placeholder",
            path.display(),
            metadata.len()
        );
        tracing::warn!(path = %path.display(), bytes = metadata.len(), "Suspiciously small model artifact");
        return Ok(Some(warning));
    }

    Ok(None)
}

/// The loaded primary pipeline models
pub struct ModelSet {
    pub detection: Box<dyn InferenceSession>,
    pub recognition: Box<dyn InferenceSession>,
    pub angle: Option<Box<dyn InferenceSession>>,
    pub charset: Charset,
    /// Non-fatal findings from loading (e.g. placeholder-sized artifacts)
    pub warnings: Vec<String>,
}

impl fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSet")
            .field("charset_len", &self.charset.len())
            .field("has_angle", &self.angle.is_some())
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

impl ModelSet {
    pub fn new(
        detection: Box<dyn InferenceSession>,
        recognition: Box<dyn InferenceSession>,
        angle: Option<Box<dyn InferenceSession>>,
        charset: Charset,
    ) -> Self {
        Self {
            detection,
            recognition,
            angle,
            charset,
            warnings: Vec::new(),
        }
    }

    /// Resolve, check and load every artifact. Blocking.
    pub fn load(
        sources: &ModelSources,
        loader: &dyn SessionLoader,
        options: &SessionOptions,
        progress: &ProgressSender,
    ) -> Result<Self, OcrError> {
        let mut warnings = Vec::new();

        let mut load_session = |label: &str, source: &ModelSource, percent: u8| {
            progress.emit(format!("Loading {} model", label), percent);
            let path = source.resolve()?;
            warnings.extend(check_artifact_size(&path)?);
            tracing::info!(model = label, path = %path.display(), backend = %options.backend, "Loading model");
            loader.load(&path, options)
        };

        let detection = load_session("detection", &sources.detection, 10)?;
        let recognition = load_session("recognition", &sources.recognition, 40)?;
        let angle = match &sources.angle {
            Some(source) => Some(load_session("angle classification", source, 70)?),
            None => None,
        };

        progress.emit("Loading charset", 90);
        let charset = Charset::load(&sources.charset.resolve()?)?;
        progress.emit("Models loaded", 100);

        tracing::info!(
            charset_len = charset.len(),
            angle = angle.is_some(),
            "Model set ready"
        );

        Ok(Self {
            detection,
            recognition,
            angle,
            charset,
            warnings,
        })
    }
}
