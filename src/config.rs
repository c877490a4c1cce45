//! Command line and runtime configuration

use crate::detection::DetectionParams;
use crate::models::ModelSources;
use crate::preprocessing::RecognitionShape;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ocr-inference-server")]
#[command(about = "OCR inference server with automatic fallback to a secondary engine")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "OCR_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "OCR_PORT", default_value = "9292")]
    pub port: u16,

    /// Maximum upload size in bytes (default: 50MB)
    #[arg(long, env = "OCR_MAX_FILE_SIZE", default_value = "52428800")]
    pub max_file_size: usize,

    /// Directory holding detection.onnx, recognition.onnx, charset.txt and
    /// optionally angle.onnx. Without it only the secondary engine is used.
    #[arg(long, env = "OCR_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Tiny identity model used to smoke-test each backend while probing
    #[arg(long, env = "OCR_IDENTITY_MODEL")]
    pub identity_model: Option<PathBuf>,

    /// Skip the primary pipeline and serve everything from the secondary engine
    #[arg(long, env = "OCR_FORCE_FALLBACK")]
    pub force_fallback: bool,

    /// Intra-op threads for the vectorized CPU backend
    #[arg(long, env = "OCR_INTRA_THREADS")]
    pub intra_threads: Option<usize>,

    /// Language for the Tesseract secondary engine (e.g., "eng", "deu")
    #[arg(long, env = "OCR_DEFAULT_LANGUAGE", default_value = "eng")]
    pub default_language: String,

    /// Per-request deadline in seconds
    #[arg(long, env = "OCR_REQUEST_TIMEOUT", default_value = "120")]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    pub request_timeout: Duration,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Go straight to the secondary engine
    pub force_fallback: bool,
    /// Primary pipeline artifacts; `None` means no primary pipeline
    pub models: Option<ModelSources>,
    pub identity_model: Option<PathBuf>,
    pub intra_threads: Option<usize>,
    pub probe_timeout_ms: u64,
    /// Load the model set during `initialize()` instead of on first use
    pub preload_models: bool,
    /// Side of the square detection canvas
    pub canvas_size: u32,
    pub detection: DetectionParams,
    pub recognition: RecognitionShape,
    pub secondary_language: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            force_fallback: false,
            models: None,
            identity_model: None,
            intra_threads: None,
            probe_timeout_ms: 5_000,
            preload_models: true,
            canvas_size: 640,
            detection: DetectionParams::default(),
            recognition: RecognitionShape::default(),
            secondary_language: "eng".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Per-call processing options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Regions recognized between progress reports
    pub batch_size: usize,
    pub angle_correction: bool,
    /// Overrides the configured detection threshold
    pub score_threshold: Option<f32>,
    /// Overrides the configured NMS IoU threshold
    pub nms_threshold: Option<f32>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            angle_correction: true,
            score_threshold: None,
            nms_threshold: None,
        }
    }
}

impl ProcessOptions {
    /// `base` with this call's overrides applied
    pub fn detection_params(&self, base: &DetectionParams) -> DetectionParams {
        let mut params = *base;
        if let Some(t) = self.score_threshold {
            params.score_threshold = t;
        }
        if let Some(t) = self.nms_threshold {
            params.nms_threshold = t;
        }
        params
    }
}

/// Everything the server binary needs
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            server: ServerConfig {
                host: args.host,
                port: args.port,
                max_file_size: args.max_file_size,
                request_timeout: Duration::from_secs(args.request_timeout_secs),
            },
            engine: EngineConfig {
                force_fallback: args.force_fallback,
                models: args.model_dir.as_deref().map(ModelSources::from_dir),
                identity_model: args.identity_model,
                intra_threads: args.intra_threads,
                secondary_language: args.default_language,
                ..EngineConfig::default()
            },
        }
    }
}
