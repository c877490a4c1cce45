//! OCRS secondary engine
//!
//! Pure Rust OCR engine using the ocrs library. No system dependencies required.
//! Downloads its neural network models automatically on first use.

use super::{SecondaryEngine, SecondaryOutput, SecondaryWord};
use crate::error::OcrError;
use crate::geometry::BoundingBox;
use crate::models::download::ensure_downloaded;
use image::DynamicImage;
use ocrs::{DecodeMethod, ImageSource, OcrEngine as OcrsOcrEngine, OcrEngineParams, TextItem};
use rten::Model;

/// Default model URLs from the ocrs project
const DETECTION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-detection.rten";
const RECOGNITION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-recognition.rten";

/// Secondary engine wrapping the ocrs library
pub struct OcrsEngine {
    engine: OcrsOcrEngine,
}

impl OcrsEngine {
    /// Create the engine, downloading models if needed
    pub fn new() -> Result<Self, OcrError> {
        let detection_model_path = ensure_downloaded(DETECTION_MODEL_URL)
            .map_err(|e| OcrError::InitializationError(e.to_string()))?;
        let recognition_model_path = ensure_downloaded(RECOGNITION_MODEL_URL)
            .map_err(|e| OcrError::InitializationError(e.to_string()))?;

        let detection_model = Model::load_file(&detection_model_path).map_err(|e| {
            OcrError::InitializationError(format!("Failed to load detection model: {}", e))
        })?;
        let recognition_model = Model::load_file(&recognition_model_path).map_err(|e| {
            OcrError::InitializationError(format!("Failed to load recognition model: {}", e))
        })?;

        let engine = OcrsOcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            decode_method: DecodeMethod::Greedy,
            ..Default::default()
        })
        .map_err(|e| {
            OcrError::InitializationError(format!("Failed to create OCR engine: {}", e))
        })?;

        tracing::info!("ocrs engine initialized successfully");

        Ok(Self { engine })
    }
}

impl SecondaryEngine for OcrsEngine {
    fn name(&self) -> &'static str {
        "ocrs"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<SecondaryOutput, OcrError> {
        // ImageSource::from_bytes expects HWC RGB8
        let rgb_img = image.to_rgb8();
        let dimensions = rgb_img.dimensions();

        let img_source = ImageSource::from_bytes(rgb_img.as_raw(), dimensions).map_err(|e| {
            OcrError::InferenceError(format!("Failed to create image source: {}", e))
        })?;

        let ocr_input = self
            .engine
            .prepare_input(img_source)
            .map_err(|e| OcrError::InferenceError(format!("Failed to prepare input: {}", e)))?;

        let word_rects = self
            .engine
            .detect_words(&ocr_input)
            .map_err(|e| OcrError::InferenceError(format!("Failed to detect words: {}", e)))?;

        let line_rects = self.engine.find_text_lines(&ocr_input, &word_rects);

        let line_texts = self
            .engine
            .recognize_text(&ocr_input, &line_rects)
            .map_err(|e| OcrError::InferenceError(format!("Failed to recognize text: {}", e)))?;

        let mut words = Vec::new();
        let mut lines = Vec::new();

        for line in line_texts.iter().flatten() {
            let boxed = line
                .words()
                .map(|word| {
                    let rect = word.bounding_rect();
                    let bbox = BoundingBox::new(
                        rect.left() as f32,
                        rect.top() as f32,
                        rect.width() as f32,
                        rect.height() as f32,
                    );
                    (word.to_string(), bbox)
                })
                .collect();
            let (line_text, line_words) = score_line(boxed);
            words.extend(line_words);
            lines.push(line_text);
        }

        let text = lines.join("\n");

        // ocrs reports no scores, so confidence comes from text quality
        let confidence = calculate_confidence(&text);

        tracing::debug!(words = words.len(), confidence, "ocrs recognition complete");

        Ok(SecondaryOutput {
            text,
            confidence,
            words,
        })
    }
}

/// Calculate confidence score based on text quality heuristics.
///
/// ocrs provides no per-character scores, so the recognized text is
/// inspected for patterns that indicate OCR quality.
/// Join a line's words and score each with the confidence of the whole line.
///
/// The text heuristics need a few words of context, so single words are
/// never scored on their own.
fn score_line(words: Vec<(String, BoundingBox)>) -> (String, Vec<SecondaryWord>) {
    let text = words
        .iter()
        .map(|(word, _)| word.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = calculate_confidence(&text);

    let words = words
        .into_iter()
        .map(|(text, bbox)| SecondaryWord {
            text,
            confidence,
            bbox,
        })
        .collect();

    (text, words)
}

pub(crate) fn calculate_confidence(text: &str) -> f32 {
    if text.is_empty() {
        return 0.0;
    }
    if text.len() < 5 {
        return 0.5; // Too short to judge accurately
    }

    let char_score = analyze_char_frequency(text);
    let word_score = analyze_word_lengths(text);
    let whitespace_score = analyze_whitespace(text);
    let repetition_score = detect_repetition(text);

    let confidence =
        0.40 * char_score + 0.30 * word_score + 0.15 * whitespace_score + 0.15 * repetition_score;

    confidence.clamp(0.0, 1.0)
}

/// Analyze character frequency for signs of garbled OCR.
///
/// Penalizes text with too many special/control characters or too few letters.
fn analyze_char_frequency(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let special = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !c.is_ascii_punctuation())
        .count();

    // Penalize high special char ratio
    let special_ratio = special as f32 / total as f32;
    let special_penalty = 1.0 - (special_ratio * 10.0).min(1.0);

    // Penalize very low letter content (unless it's a numeric document)
    let letter_ratio = letters as f32 / total as f32;
    let letter_score = (letter_ratio * 1.5).min(1.0);

    special_penalty * 0.6 + letter_score * 0.4
}

/// Analyze word length distribution.
///
/// Garbled OCR often produces single-character "words" or very long sequences.
fn analyze_word_lengths(text: &str) -> f32 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.5;
    }

    let total_len: usize = words.iter().map(|w| w.len()).sum();
    let avg_len = total_len as f32 / words.len() as f32;

    // Ideal average word length: 4-8 chars
    let avg_score = match avg_len as usize {
        0..=1 => 0.3,
        2..=3 => 0.7,
        4..=8 => 1.0,
        9..=12 => 0.8,
        _ => 0.4,
    };

    // Penalize too many single-char "words"
    let single_count = words.iter().filter(|w| w.len() == 1).count();
    let single_ratio = single_count as f32 / words.len() as f32;
    let single_penalty = 1.0 - (single_ratio * 1.5).min(0.5);

    avg_score * single_penalty
}

/// Analyze whitespace ratio.
///
/// Normal text has ~10-25% whitespace. Too dense or too sparse indicates issues.
fn analyze_whitespace(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }

    let whitespace = text.chars().filter(|c| c.is_whitespace()).count();
    let ratio = (whitespace as f32 / total as f32) * 100.0;

    match ratio as usize {
        0..=5 => 0.5,   // Too dense
        6..=10 => 0.8,  // Slightly dense
        11..=25 => 1.0, // Ideal
        26..=40 => 0.7, // Slightly sparse
        _ => 0.3,       // Too sparse
    }
}

/// Detect repeated character sequences.
///
/// Patterns like "aaaa" or "####" often indicate OCR confusion.
fn detect_repetition(text: &str) -> f32 {
    let mut max_repeat = 1;
    let mut current = 1;
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if Some(c) == prev && !c.is_whitespace() {
            current += 1;
            max_repeat = max_repeat.max(current);
        } else {
            current = 1;
        }
        prev = Some(c);
    }

    match max_repeat {
        1..=3 => 1.0,
        4..=5 => 0.8,
        6..=10 => 0.5,
        _ => 0.2,
    }
}
