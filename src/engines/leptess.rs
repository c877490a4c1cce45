//! Leptess/Tesseract secondary engine
//!
//! Tesseract-based OCR engine. Better for noisy/messy images like phone photos.
//! Uses tesseract-static crate for static linking (no system dependencies).
//! Downloads tessdata (training data) automatically on first use.

use super::{SecondaryEngine, SecondaryOutput};
use crate::error::OcrError;
use crate::models::download::ensure_downloaded;
use image::DynamicImage;
use tesseract_static::tesseract::Tesseract;

/// Tesseract OCR engine
pub struct LeptessEngine {
    /// Directory holding `<language>.traineddata`
    tessdata_path: String,
    language: String,
}

impl LeptessEngine {
    pub fn new(language: &str) -> Result<Self, OcrError> {
        let tessdata_path = ensure_tessdata_available(language)?;

        // Validate that tessdata is accessible by doing a test initialization
        let test_tess = Tesseract::new(Some(&tessdata_path), Some(language)).map_err(|e| {
            OcrError::InitializationError(format!("Failed to initialize Tesseract: {}", e))
        })?;
        drop(test_tess);

        tracing::info!(
            "Leptess engine initialized (tessdata: {}, language: {})",
            tessdata_path,
            language
        );

        Ok(Self {
            tessdata_path,
            language: language.to_string(),
        })
    }
}

impl SecondaryEngine for LeptessEngine {
    fn name(&self) -> &'static str {
        "leptess"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<SecondaryOutput, OcrError> {
        let rgb_img = image.to_rgb8();
        let (width, height) = rgb_img.dimensions();

        // BMP is always supported by leptonica
        let mut bmp_data = Vec::new();
        rgb_img
            .write_to(&mut std::io::Cursor::new(&mut bmp_data), image::ImageFormat::Bmp)
            .map_err(|e| OcrError::PreprocessingError(format!("Failed to convert to BMP: {}", e)))?;

        tracing::debug!(
            "Processing image: {}x{}, BMP size: {} bytes",
            width,
            height,
            bmp_data.len()
        );

        let tess = Tesseract::new(Some(&self.tessdata_path), Some(&self.language))
            .map_err(|e| OcrError::InferenceError(format!("Failed to create Tesseract: {}", e)))?;

        let mut tess = tess
            .set_image_from_mem(&bmp_data)
            .map_err(|e| {
                OcrError::InferenceError(format!(
                    "Failed to set image ({}x{}, {} bytes): {}",
                    width,
                    height,
                    bmp_data.len(),
                    e
                ))
            })?
            .recognize()
            .map_err(|e| OcrError::InferenceError(format!("Failed to recognize text: {}", e)))?;

        let text = tess
            .get_text()
            .map_err(|e| OcrError::InferenceError(format!("Failed to get text: {}", e)))?;

        // 0-100 scale
        let confidence = tess.mean_text_conf() as f32 / 100.0;

        Ok(SecondaryOutput {
            text: text.trim().to_string(),
            confidence,
            words: Vec::new(),
        })
    }
}

/// Ensure tessdata for `language` is cached and return its directory
fn ensure_tessdata_available(language: &str) -> Result<String, OcrError> {
    let traineddata = ensure_downloaded(&tessdata_url(language))
        .map_err(|e| OcrError::InitializationError(e.to_string()))?;

    // Tesseract expects the directory, not the file
    traineddata
        .parent()
        .and_then(|dir| dir.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| OcrError::InitializationError("Invalid tessdata path".to_string()))
}

/// tessdata_fast keeps downloads small
fn tessdata_url(language: &str) -> String {
    format!(
        "https://github.com/tesseract-ocr/tessdata_fast/raw/main/{}.traineddata",
        language
    )
}
