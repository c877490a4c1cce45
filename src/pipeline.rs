//! Blocking pipeline runs for the primary models and the secondary engine.
//!
//! Everything here executes on the blocking pool; the engine facade owns
//! scheduling, state and fallback.

use crate::backend::Backend;
use crate::config::{EngineConfig, ProcessOptions};
use crate::detection::{postprocess, split_outputs, DetectionParams};
use crate::engines::SecondaryEngine;
use crate::error::OcrError;
use crate::geometry::BoundingBox;
use crate::models::ModelSet;
use crate::preprocessing::{preprocess_for_detection, preprocess_for_recognition, RecognitionShape};
use crate::progress::ProgressSender;
use crate::recognition::angle::{self, Rotation};
use crate::recognition::{recognize, region_confidence};
use crate::result::{OcrResult, OcrStatistics, RegionSource, TextRegion};
use crate::session::InferenceSession;
use image::{DynamicImage, GenericImageView};
use std::time::Instant;

/// Geometry settings shared by every call on one engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub canvas_size: u32,
    pub detection: DetectionParams,
    pub recognition: RecognitionShape,
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            canvas_size: config.canvas_size,
            detection: config.detection,
            recognition: config.recognition,
        }
    }
}

/// Run the detector and post-process its output into empty-text regions,
/// highest confidence first.
pub fn detect(
    models: &mut ModelSet,
    image: &DynamicImage,
    canvas_size: u32,
    params: &DetectionParams,
) -> Result<Vec<TextRegion>, OcrError> {
    let input = preprocess_for_detection(image, canvas_size)?;
    let outputs = models.detection.run_single(input.tensor.into_dyn())?;
    let maps = split_outputs(outputs)?;
    let stride = maps.stride(canvas_size);

    Ok(postprocess(
        maps.probability.view(),
        maps.geometry.view(),
        params,
        stride,
        &input.transform,
        input.image_width,
        input.image_height,
    ))
}

/// Crop, rotate upright if needed, recognize and score one region.
pub fn try_recognize_region(
    models: &mut ModelSet,
    image: &DynamicImage,
    region: &TextRegion,
    shape: &RecognitionShape,
    angle_correction: bool,
) -> Result<TextRegion, OcrError> {
    let (crop, tensor) = preprocess_for_recognition(image, &region.bounding_box, shape)?;

    let classifier = match models.angle.as_mut() {
        Some(session) if angle_correction => Some(&mut **session as &mut dyn InferenceSession),
        _ => None,
    };
    let corrected = angle::correct(classifier, &crop.image, tensor, shape);
    if corrected.rotation != Rotation::Upright {
        tracing::debug!(
            bbox = ?region.bounding_box,
            crop = ?crop.bounds,
            degrees = corrected.rotation.degrees(),
            "Region rotated upright"
        );
    }

    let recognized = recognize(models.recognition.as_mut(), corrected.tensor, &models.charset)?;

    let diagnostics: Vec<String> = corrected
        .diagnostic
        .into_iter()
        .chain(recognized.diagnostics)
        .collect();

    let mut out = region.clone();
    out.text = recognized.text;
    out.confidence = region_confidence(region.confidence, recognized.confidence);
    out.diagnostic = (!diagnostics.is_empty()).then(|| diagnostics.join("; "));
    Ok(out)
}

/// Whole-image OCR on the primary models.
///
/// Detection errors abort the call. A region whose recognition fails is kept
/// as an empty, zero-confidence region carrying a diagnostic.
pub fn run_image(
    models: &mut ModelSet,
    image: &DynamicImage,
    settings: &PipelineSettings,
    options: &ProcessOptions,
    backend: Backend,
    progress: &ProgressSender,
) -> Result<OcrResult, OcrError> {
    let start = Instant::now();
    let params = options.detection_params(&settings.detection);

    progress.emit("Detecting text regions", 10);
    let regions = detect(models, image, settings.canvas_size, &params)?;
    let detection_time_ms = start.elapsed().as_millis() as u64;

    let total = regions.len();
    progress.emit(format!("Found {} text regions", total), 30);
    tracing::debug!(regions = total, detection_time_ms, "Detection complete");

    let recognition_start = Instant::now();
    let batch_size = options.batch_size.max(1);
    let mut recognized = Vec::with_capacity(total);

    for batch in regions.chunks(batch_size) {
        for region in batch {
            let result = try_recognize_region(
                models,
                image,
                region,
                &settings.recognition,
                options.angle_correction,
            );
            recognized.push(match result {
                Ok(region) => region,
                Err(e) => {
                    tracing::warn!(
                        bbox = ?region.bounding_box,
                        error = %e,
                        "Region recognition failed"
                    );
                    region.clone().failed(format!("recognition failed: {}", e))
                }
            });
        }

        let done = recognized.len();
        let percent = 30 + (65 * done / total.max(1)) as u8;
        progress.emit(format!("Recognized {}/{} regions", done, total), percent);
    }

    let recognition_time_ms = recognition_start.elapsed().as_millis() as u64;

    let mut warnings = models.warnings.clone();
    let failed = recognized.iter().filter(|r| r.is_failed()).count();
    if failed > 0 {
        warnings.push(format!("{} of {} regions failed recognition", failed, total));
    }

    let statistics = OcrStatistics {
        detection_time_ms,
        recognition_time_ms,
        ..OcrStatistics::default()
    };

    Ok(OcrResult::from_regions(
        recognized,
        backend,
        statistics,
        warnings,
        start.elapsed().as_millis() as u64,
    ))
}

/// Re-OCR a caller-supplied region on the primary models. Any failure
/// propagates.
pub fn run_region(
    models: &mut ModelSet,
    image: &DynamicImage,
    bounding_box: BoundingBox,
    settings: &PipelineSettings,
    options: &ProcessOptions,
    backend: Backend,
) -> Result<OcrResult, OcrError> {
    let start = Instant::now();
    let (width, height) = image.dimensions();
    let region = TextRegion::new(
        bounding_box,
        1.0,
        String::new(),
        RegionSource::Region,
        width,
        height,
    );

    let recognized = try_recognize_region(
        models,
        image,
        &region,
        &settings.recognition,
        options.angle_correction,
    )?;

    let elapsed = start.elapsed().as_millis() as u64;
    let statistics = OcrStatistics {
        recognition_time_ms: elapsed,
        ..OcrStatistics::default()
    };

    Ok(OcrResult::from_regions(
        vec![recognized],
        backend,
        statistics,
        models.warnings.clone(),
        elapsed,
    ))
}

/// Whole-image OCR on the secondary engine
pub fn run_secondary_image(
    engine: &dyn SecondaryEngine,
    image: &DynamicImage,
    progress: &ProgressSender,
) -> Result<OcrResult, OcrError> {
    let start = Instant::now();
    let (width, height) = image.dimensions();

    progress.emit(format!("Recognizing with {}", engine.name()), 20);
    let output = engine.recognize(image)?;
    let regions = output.into_regions(width, height);
    progress.emit(format!("Recognized {} regions", regions.len()), 95);

    let elapsed = start.elapsed().as_millis() as u64;
    let statistics = OcrStatistics {
        recognition_time_ms: elapsed,
        ..OcrStatistics::default()
    };

    Ok(OcrResult::from_regions(
        regions,
        Backend::Secondary,
        statistics,
        Vec::new(),
        elapsed,
    ))
}

/// Re-OCR a region on the secondary engine. The result holds a single region
/// covering `bounding_box`.
pub fn run_secondary_region(
    engine: &dyn SecondaryEngine,
    image: &DynamicImage,
    bounding_box: BoundingBox,
) -> Result<OcrResult, OcrError> {
    let start = Instant::now();
    let (width, height) = image.dimensions();
    let bounds = bounding_box.clamp_to(width, height);

    let x = bounds.x.floor() as u32;
    let y = bounds.y.floor() as u32;
    let w = (bounds.right().ceil() as u32).min(width).saturating_sub(x);
    let h = (bounds.bottom().ceil() as u32).min(height).saturating_sub(y);
    if w == 0 || h == 0 {
        return Err(OcrError::InvalidRequest(format!(
            "Region {:?} lies outside the {}x{} image",
            bounding_box, width, height
        )));
    }

    let output = engine.recognize(&image.crop_imm(x, y, w, h))?;
    let region = TextRegion::new(
        bounds,
        output.confidence,
        output.text.trim().to_string(),
        RegionSource::Secondary,
        width,
        height,
    );

    let elapsed = start.elapsed().as_millis() as u64;
    let statistics = OcrStatistics {
        recognition_time_ms: elapsed,
        ..OcrStatistics::default()
    };

    Ok(OcrResult::from_regions(
        vec![region],
        Backend::Secondary,
        statistics,
        Vec::new(),
        elapsed,
    ))
}
