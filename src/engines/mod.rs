//! Secondary OCR engines
//!
//! The secondary engine takes over when the primary pipeline cannot start or
//! fails at runtime. Implementations are conditionally compiled based on
//! feature flags; the first one compiled in is used by default.

#[cfg(feature = "engine-ocrs")]
pub mod ocrs;

#[cfg(feature = "engine-leptess")]
pub mod leptess;

use crate::error::OcrError;
use crate::geometry::BoundingBox;
use crate::result::{RegionSource, TextRegion};
use image::DynamicImage;
use std::sync::Arc;

/// A word reported by the secondary engine, in image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryWord {
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Whole-image output of the secondary engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecondaryOutput {
    pub text: String,
    pub confidence: f32,
    pub words: Vec<SecondaryWord>,
}

impl SecondaryOutput {
    /// One region per word. Engines that report no word boxes yield a single
    /// region spanning the whole image when any text was found.
    pub fn into_regions(self, width: u32, height: u32) -> Vec<TextRegion> {
        if self.words.is_empty() {
            if self.text.trim().is_empty() {
                return Vec::new();
            }
            return vec![TextRegion::new(
                BoundingBox::new(0.0, 0.0, width as f32, height as f32),
                self.confidence,
                self.text.trim().to_string(),
                RegionSource::Secondary,
                width,
                height,
            )];
        }

        self.words
            .into_iter()
            .map(|word| {
                TextRegion::new(
                    word.bbox,
                    word.confidence,
                    word.text,
                    RegionSource::Secondary,
                    width,
                    height,
                )
            })
            .collect()
    }
}

/// A self-contained OCR engine used as the fallback path
pub trait SecondaryEngine: Send + Sync {
    /// Engine identifier (e.g., "ocrs", "leptess")
    fn name(&self) -> &'static str;

    /// Recognize all text in `image`. Blocking.
    fn recognize(&self, image: &DynamicImage) -> Result<SecondaryOutput, OcrError>;
}

/// Starts the secondary engine on demand. Blocking.
pub trait SecondaryFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn SecondaryEngine>, OcrError>;
}

/// Builds the first secondary engine compiled into this binary
#[derive(Debug, Clone)]
pub struct DefaultSecondaryFactory {
    /// Tesseract language code
    pub language: String,
}

impl DefaultSecondaryFactory {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Names of the secondary engines compiled in, in preference order
    pub fn available() -> Vec<&'static str> {
        let mut names = Vec::new();
        #[cfg(feature = "engine-ocrs")]
        names.push("ocrs");
        #[cfg(feature = "engine-leptess")]
        names.push("leptess");
        names
    }
}

impl SecondaryFactory for DefaultSecondaryFactory {
    #[allow(unreachable_code, unused_variables)]
    fn create(&self) -> Result<Arc<dyn SecondaryEngine>, OcrError> {
        #[cfg(feature = "engine-ocrs")]
        {
            tracing::info!("Initializing ocrs secondary engine...");
            return Ok(Arc::new(ocrs::OcrsEngine::new()?));
        }

        #[cfg(feature = "engine-leptess")]
        {
            tracing::info!("Initializing leptess secondary engine...");
            return Ok(Arc::new(leptess::LeptessEngine::new(&self.language)?));
        }

        Err(OcrError::InitializationError(
            "No secondary OCR engine available. Build with --features engine-ocrs or --features engine-leptess".to_string(),
        ))
    }
}
