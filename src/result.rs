//! Values returned to callers of the engine

use crate::backend::Backend;
use crate::geometry::BoundingBox;
use serde::{Deserialize, Serialize};

/// Points per pixel at 96 DPI, used to turn a line height into a font size
const PT_PER_PX: f32 = 0.75;

/// Clamp a confidence into [0,1], mapping NaN to 0.
#[inline]
pub fn sanitize_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Which stage produced a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionSource {
    /// Found by the detection model
    Detection,
    /// Supplied by the caller for re-OCR
    Region,
    /// Reported by the secondary engine
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub text: String,
    pub font_size_estimate: f32,
    pub source: RegionSource,
    /// Why the region degraded, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Recognition raised an error for this region
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recognition_failed: bool,
}

impl TextRegion {
    /// Build a region clamped to a `width` x `height` image.
    pub fn new(
        bounding_box: BoundingBox,
        confidence: f32,
        text: String,
        source: RegionSource,
        width: u32,
        height: u32,
    ) -> Self {
        let bounding_box = bounding_box.clamp_to(width, height);
        Self {
            font_size_estimate: bounding_box.height * PT_PER_PX,
            bounding_box,
            confidence: sanitize_confidence(confidence),
            text,
            source,
            diagnostic: None,
            recognition_failed: false,
        }
    }

    /// A region whose recognition failed: empty text, zero confidence.
    pub fn failed(mut self, diagnostic: impl Into<String>) -> Self {
        self.text.clear();
        self.confidence = 0.0;
        self.diagnostic = Some(diagnostic.into());
        self.recognition_failed = true;
        self
    }

    /// Only recognition errors count; swallowed diagnostics do not.
    pub fn is_failed(&self) -> bool {
        self.recognition_failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrStatistics {
    pub total_regions: usize,
    /// Regions with non-empty text
    pub recognized_regions: usize,
    /// Regions whose recognition raised an error
    pub failed_regions: usize,
    /// `recognized_regions / total_regions`, 0 when nothing was found
    pub recognition_rate: f32,
    pub detection_time_ms: u64,
    pub recognition_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    /// Ordered by confidence, highest first
    pub regions: Vec<TextRegion>,
    pub overall_confidence: f32,
    pub statistics: OcrStatistics,
    pub engine_used: Backend,
    pub processing_time_ms: u64,
    pub warnings: Vec<String>,
}

impl OcrResult {
    /// Aggregate regions into a result. Regions are ordered by confidence.
    pub fn from_regions(
        mut regions: Vec<TextRegion>,
        engine_used: Backend,
        mut statistics: OcrStatistics,
        warnings: Vec<String>,
        processing_time_ms: u64,
    ) -> Self {
        regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let total = regions.len();
        let recognized = regions.iter().filter(|r| !r.text.is_empty()).count();
        let failed = regions.iter().filter(|r| r.is_failed()).count();

        let overall_confidence = if total == 0 {
            0.0
        } else {
            sanitize_confidence(regions.iter().map(|r| r.confidence).sum::<f32>() / total as f32)
        };

        statistics.total_regions = total;
        statistics.recognized_regions = recognized;
        statistics.failed_regions = failed;
        statistics.recognition_rate = if total == 0 {
            0.0
        } else {
            recognized as f32 / total as f32
        };

        Self {
            regions,
            overall_confidence,
            statistics,
            engine_used,
            processing_time_ms,
            warnings,
        }
    }

    /// All region texts in result order, one per line
    pub fn text(&self) -> String {
        self.regions
            .iter()
            .filter(|r| !r.text.is_empty())
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
