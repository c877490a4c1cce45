//! OCR inference engine
//!
//! Turns raw images into confidence-scored text regions. A two-stage
//! detector and recognizer runs on the best numeric backend that passes its
//! capability probe; when that path is unavailable or fails, the engine
//! switches for good to a self-contained secondary OCR engine.
//!
//! ```no_run
//! use ocr_inference_engine::{Engine, EngineConfig, ProcessOptions};
//!
//! # async fn run(image: image::DynamicImage) -> Result<(), ocr_inference_engine::OcrError> {
//! let engine = Engine::new(EngineConfig::default());
//! engine.initialize().await?;
//! let result = engine.process_image(image, ProcessOptions::default()).await?;
//! println!("{} ({:.2})", result.text(), result.overall_confidence);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod detection;
pub mod engine;
pub mod engines;
pub mod error;
pub mod fallback;
pub mod geometry;
pub mod models;
pub mod pipeline;
pub mod preprocessing;
pub mod progress;
pub mod recognition;
pub mod result;
pub mod server;
pub mod session;
pub mod worker;

pub use backend::{Backend, BackendProbe, BackendSelector};
pub use config::{Args, Config, EngineConfig, ProcessOptions, ServerConfig};
pub use engine::{with_timeout, Engine, EngineBuilder, EngineInfo, InitStatus};
pub use engines::{SecondaryEngine, SecondaryFactory, SecondaryOutput, SecondaryWord};
pub use error::OcrError;
pub use fallback::EngineState;
pub use geometry::BoundingBox;
pub use models::{Charset, ModelSet, ModelSource, ModelSources};
pub use progress::ProgressEvent;
pub use result::{OcrResult, OcrStatistics, RegionSource, TextRegion};
pub use session::{InferenceSession, SessionLoader, SessionOptions};
pub use worker::OcrWorker;
