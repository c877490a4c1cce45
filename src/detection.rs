//! Detection post-processing
//!
//! Turns EAST-style detector output (a probability map plus per-pixel
//! distances to the four box edges) into de-duplicated text regions in
//! original-image coordinates.

use crate::error::OcrError;
use crate::geometry::BoundingBox;
use crate::preprocessing::LetterboxTransform;
use crate::result::{RegionSource, TextRegion};
use ndarray::{s, Array2, Array3, ArrayD, ArrayView2, ArrayView3, Axis, Ix2, Ix3};
use serde::{Deserialize, Serialize};

/// Thresholds and limits applied to detector output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Minimum pixel probability for a candidate
    pub score_threshold: f32,
    /// Candidates overlapping a stronger one above this IoU are dropped
    pub nms_threshold: f32,
    /// Boxes narrower or shorter than this (canvas pixels) are rejected
    pub min_box_size: f32,
    /// Boxes whose long/short side ratio exceeds this are rejected
    pub max_aspect_ratio: f32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            min_box_size: 5.0,
            max_aspect_ratio: 20.0,
        }
    }
}

/// A box proposed by a single map pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Rebuild one box per pixel whose probability reaches `threshold`.
///
/// `stride` is the number of canvas pixels per map pixel; the geometry
/// channels are the distances (top, right, bottom, left) in canvas pixels.
/// Candidates come out in raster order.
pub fn decode_candidates(
    probability: ArrayView2<f32>,
    geometry: ArrayView3<f32>,
    threshold: f32,
    stride: f32,
) -> Vec<Candidate> {
    let (rows, cols) = probability.dim();
    let mut candidates = Vec::new();

    for y in 0..rows {
        for x in 0..cols {
            let score = probability[[y, x]];
            if !(score >= threshold) {
                continue;
            }

            let px = x as f32 * stride;
            let py = y as f32 * stride;
            let top = geometry[[0, y, x]];
            let right = geometry[[1, y, x]];
            let bottom = geometry[[2, y, x]];
            let left = geometry[[3, y, x]];

            candidates.push(Candidate {
                bbox: BoundingBox::from_edges(px - left, py - top, px + right, py + bottom),
                confidence: score,
            });
        }
    }

    candidates
}

/// Drop boxes that are too small or too elongated to be text.
pub fn filter_candidates(
    candidates: Vec<Candidate>,
    min_box_size: f32,
    max_aspect_ratio: f32,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| {
            c.bbox.width >= min_box_size
                && c.bbox.height >= min_box_size
                && c.bbox.aspect_ratio() <= max_aspect_ratio
        })
        .collect()
}

/// Greedy non-maximum suppression.
///
/// Candidates are stably sorted by confidence (ties keep their input order),
/// then each surviving candidate suppresses every later one whose IoU with it
/// exceeds `iou_threshold`.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; candidates.len()];
    let mut kept = Vec::new();

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(candidates[i]);

        for j in (i + 1)..candidates.len() {
            if !suppressed[j] && candidates[i].bbox.iou(&candidates[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    kept
}

/// Full post-processing: decode, filter, suppress, then map back to the
/// original image and clamp. Output is ordered by confidence, highest first.
pub fn postprocess(
    probability: ArrayView2<f32>,
    geometry: ArrayView3<f32>,
    params: &DetectionParams,
    stride: f32,
    transform: &LetterboxTransform,
    image_width: u32,
    image_height: u32,
) -> Vec<TextRegion> {
    let candidates = decode_candidates(probability, geometry, params.score_threshold, stride);
    let decoded = candidates.len();
    let candidates = filter_candidates(candidates, params.min_box_size, params.max_aspect_ratio);
    let filtered = candidates.len();
    let kept = non_max_suppression(candidates, params.nms_threshold);

    tracing::debug!(decoded, filtered, kept = kept.len(), "Detection post-processing");

    kept.into_iter()
        .map(|c| {
            let (left, top) = transform.inverse(c.bbox.x, c.bbox.y);
            let (right, bottom) = transform.inverse(c.bbox.right(), c.bbox.bottom());
            TextRegion::new(
                BoundingBox::from_edges(left, top, right, bottom),
                c.confidence,
                String::new(),
                RegionSource::Detection,
                image_width,
                image_height,
            )
        })
        .collect()
}

/// Raw detector output split into its probability and geometry maps
#[derive(Debug, Clone)]
pub struct DetectionMaps {
    pub probability: Array2<f32>,
    /// `[4, H, W]`: top, right, bottom, left distances
    pub geometry: Array3<f32>,
}

impl DetectionMaps {
    /// Canvas pixels per map pixel
    pub fn stride(&self, canvas_size: u32) -> f32 {
        let cols = self.probability.ncols().max(1);
        canvas_size as f32 / cols as f32
    }
}

/// Drop leading unit axes until the array has `ndim` dimensions.
fn squeeze_to(array: ArrayD<f32>, ndim: usize) -> Result<ArrayD<f32>, OcrError> {
    let mut array = array;
    while array.ndim() > ndim {
        if array.shape()[0] != 1 {
            return Err(OcrError::InferenceError(format!(
                "Unexpected detection output shape {:?}",
                array.shape()
            )));
        }
        array = array.index_axis_move(Axis(0), 0);
    }
    Ok(array)
}

/// Identify the probability and geometry maps among the detector outputs.
///
/// The geometry map is the output with at least four channels; any extra
/// channels (e.g. a rotation angle) are ignored.
pub fn split_outputs(outputs: Vec<ArrayD<f32>>) -> Result<DetectionMaps, OcrError> {
    let mut probability = None;
    let mut geometry = None;

    for output in outputs {
        let channels = if output.ndim() >= 3 {
            output.shape()[output.ndim() - 3]
        } else {
            1
        };

        if channels >= 4 && geometry.is_none() {
            let g = squeeze_to(output, 3)?;
            geometry = Some(g.slice(s![0..4, .., ..]).to_owned());
        } else if channels == 1 && probability.is_none() {
            probability = Some(squeeze_to(output, 2)?);
        }
    }

    let probability = probability
        .ok_or_else(|| OcrError::InferenceError("Detector produced no probability map".to_string()))?
        .into_dimensionality::<Ix2>()
        .map_err(|e| OcrError::InferenceError(e.to_string()))?;
    let geometry = geometry
        .ok_or_else(|| OcrError::InferenceError("Detector produced no geometry map".to_string()))?
        .into_dimensionality::<Ix3>()
        .map_err(|e| OcrError::InferenceError(e.to_string()))?;

    if geometry.shape()[1..] != *probability.shape() {
        return Err(OcrError::InferenceError(format!(
            "Probability map {:?} and geometry map {:?} disagree",
            probability.shape(),
            geometry.shape()
        )));
    }

    Ok(DetectionMaps {
        probability,
        geometry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use proptest::prelude::*;

    fn maps(size: usize) -> (Array2<f32>, Array3<f32>) {
        (Array2::zeros((size, size)), Array3::zeros((4, size, size)))
    }

    fn set_pixel(
        prob: &mut Array2<f32>,
        geo: &mut Array3<f32>,
        (x, y): (usize, usize),
        score: f32,
        offsets: [f32; 4],
    ) {
        prob[[y, x]] = score;
        for (c, v) in offsets.iter().enumerate() {
            geo[[c, y, x]] = *v;
        }
    }

    const IDENTITY: LetterboxTransform = LetterboxTransform {
        scale_x: 1.0,
        scale_y: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    #[test]
    fn test_single_pixel_reconstructs_box() {
        let (mut prob, mut geo) = maps(32);
        set_pixel(&mut prob, &mut geo, (10, 10), 0.9, [2.0, 2.0, 2.0, 2.0]);

        let candidates = decode_candidates(prob.view(), geo.view(), 0.9, 1.0);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bbox, BoundingBox::new(8.0, 8.0, 4.0, 4.0));
        assert_eq!(candidates[0].confidence, 0.9);
    }

    #[test]
    fn test_small_box_rejected_by_default_filter() {
        let (mut prob, mut geo) = maps(32);
        set_pixel(&mut prob, &mut geo, (10, 10), 0.9, [2.0, 2.0, 2.0, 2.0]);

        let params = DetectionParams {
            score_threshold: 0.9,
            ..DetectionParams::default()
        };
        assert!(postprocess(prob.view(), geo.view(), &params, 1.0, &IDENTITY, 32, 32).is_empty());

        let relaxed = DetectionParams {
            min_box_size: 4.0,
            ..params
        };
        let regions = postprocess(prob.view(), geo.view(), &relaxed, 1.0, &IDENTITY, 32, 32);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box, BoundingBox::new(8.0, 8.0, 4.0, 4.0));
        assert_eq!(regions[0].confidence, 0.9);
        assert!(regions[0].text.is_empty());
    }

    #[test]
    fn test_elongated_box_rejected() {
        let c = Candidate {
            bbox: BoundingBox::new(0.0, 0.0, 210.0, 10.0),
            confidence: 0.9,
        };
        assert!(filter_candidates(vec![c], 5.0, 20.0).is_empty());
        assert_eq!(filter_candidates(vec![c], 5.0, 21.0).len(), 1);
    }

    #[test]
    fn test_nms_keeps_higher_confidence_on_overlap() {
        // Two 30x10 boxes offset by 10px: intersection 200, union 400, IoU 0.5
        let strong = Candidate {
            bbox: BoundingBox::new(10.0, 0.0, 30.0, 10.0),
            confidence: 0.8,
        };
        let weak = Candidate {
            bbox: BoundingBox::new(0.0, 0.0, 30.0, 10.0),
            confidence: 0.6,
        };
        assert!((strong.bbox.iou(&weak.bbox) - 0.5).abs() < 1e-6);

        let kept = non_max_suppression(vec![weak, strong], 0.3);
        assert_eq!(kept, vec![strong]);
    }

    #[test]
    fn test_nms_ties_keep_input_order() {
        let a = Candidate {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            confidence: 0.7,
        };
        let b = Candidate {
            bbox: BoundingBox::new(1.0, 0.0, 10.0, 10.0),
            confidence: 0.7,
        };
        assert_eq!(non_max_suppression(vec![a, b], 0.3), vec![a]);
        assert_eq!(non_max_suppression(vec![b, a], 0.3), vec![b]);
    }

    #[test]
    fn test_boxes_mapped_back_through_letterbox() {
        let (mut prob, mut geo) = maps(64);
        set_pixel(&mut prob, &mut geo, (20, 30), 0.95, [5.0, 10.0, 5.0, 10.0]);

        let transform = LetterboxTransform {
            scale_x: 0.5,
            scale_y: 0.5,
            offset_x: 0.0,
            offset_y: 16.0,
        };
        let regions = postprocess(
            prob.view(),
            geo.view(),
            &DetectionParams::default(),
            1.0,
            &transform,
            128,
            64,
        );

        // Canvas box (10,25)-(30,35) -> image (20,18)-(60,38)
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box, BoundingBox::new(20.0, 18.0, 40.0, 20.0));
    }

    #[test]
    fn test_stride_scales_pixel_positions() {
        let (mut prob, mut geo) = maps(8);
        set_pixel(&mut prob, &mut geo, (2, 3), 0.8, [4.0, 6.0, 4.0, 6.0]);

        let candidates = decode_candidates(prob.view(), geo.view(), 0.5, 4.0);
        assert_eq!(candidates[0].bbox, BoundingBox::from_edges(2.0, 8.0, 14.0, 16.0));
    }

    #[test]
    fn test_split_outputs_by_channel_count() {
        let prob = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 16, 16]));
        let geo = ArrayD::<f32>::zeros(IxDyn(&[1, 5, 16, 16]));

        let maps = split_outputs(vec![geo, prob]).unwrap();
        assert_eq!(maps.probability.dim(), (16, 16));
        assert_eq!(maps.geometry.dim(), (4, 16, 16));
        assert_eq!(maps.stride(64), 4.0);
    }

    #[test]
    fn test_split_outputs_rejects_mismatched_maps() {
        let prob = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 16, 16]));
        let geo = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 8, 8]));
        assert!(split_outputs(vec![prob, geo]).is_err());
    }

    #[test]
    fn test_split_outputs_requires_geometry() {
        let prob = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 16, 16]));
        assert!(split_outputs(vec![prob]).is_err());
    }

    fn arb_maps() -> impl Strategy<Value = (Array2<f32>, Array3<f32>)> {
        let size = 12usize;
        (
            proptest::collection::vec(0.0f32..1.0, size * size),
            proptest::collection::vec(0.0f32..12.0, 4 * size * size),
        )
            .prop_map(move |(p, g)| {
                (
                    Array2::from_shape_vec((size, size), p).unwrap(),
                    Array3::from_shape_vec((4, size, size), g).unwrap(),
                )
            })
    }

    proptest! {
        #[test]
        fn prop_higher_threshold_yields_subset(
            (prob, geo) in arb_maps(),
            t1 in 0.0f32..1.0,
            delta in 0.0f32..0.5,
        ) {
            let t2 = t1 + delta;
            let low = decode_candidates(prob.view(), geo.view(), t1, 1.0);
            let high = decode_candidates(prob.view(), geo.view(), t2, 1.0);
            prop_assert!(high.len() <= low.len());
            for c in &high {
                prop_assert!(low.contains(c));
            }
        }

        #[test]
        fn prop_no_overlap_above_threshold_after_nms(
            (prob, geo) in arb_maps(),
            nms in 0.05f32..0.9,
        ) {
            let params = DetectionParams {
                score_threshold: 0.3,
                nms_threshold: nms,
                min_box_size: 1.0,
                max_aspect_ratio: 50.0,
            };
            // Shift so every box lands inside the image and clamping leaves IoU untouched
            let shift = LetterboxTransform {
                scale_x: 1.0,
                scale_y: 1.0,
                offset_x: -20.0,
                offset_y: -20.0,
            };
            let regions = postprocess(prob.view(), geo.view(), &params, 1.0, &shift, 64, 64);
            for (i, a) in regions.iter().enumerate() {
                prop_assert!(a.bounding_box.is_within(64, 64));
                for b in regions.iter().skip(i + 1) {
                    prop_assert!(a.bounding_box.iou(&b.bounding_box) <= nms);
                }
            }
        }

        #[test]
        fn prop_postprocess_is_deterministic((prob, geo) in arb_maps()) {
            let params = DetectionParams::default();
            let a = postprocess(prob.view(), geo.view(), &params, 1.0, &IDENTITY, 64, 64);
            let b = postprocess(prob.view(), geo.view(), &params, 1.0, &IDENTITY, 64, 64);
            prop_assert_eq!(a, b);
        }
    }
}
