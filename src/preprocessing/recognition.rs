use super::steps::{grayscale, resize};
use crate::error::OcrError;
use crate::geometry::BoundingBox;
use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};

/// Minimum padding added around a region before cropping, in pixels
const MIN_PADDING_PX: f32 = 2.0;
/// Padding as a fraction of the region's shorter side
const PADDING_RATIO: f32 = 0.1;

/// Target geometry of recognition model input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionShape {
    pub height: u32,
    pub min_width: u32,
    pub max_width: u32,
}

impl Default for RecognitionShape {
    fn default() -> Self {
        Self {
            height: 48,
            min_width: 128,
            max_width: 1600,
        }
    }
}

/// A padded crop of the source image
#[derive(Debug, Clone)]
pub struct RegionCrop {
    pub image: DynamicImage,
    /// The padded, clamped box the crop was taken from
    pub bounds: BoundingBox,
}

/// Expand `region` by the padding margin, clamp it to the image and crop.
pub fn crop_region(image: &DynamicImage, region: &BoundingBox) -> Result<RegionCrop, OcrError> {
    let (width, height) = image.dimensions();
    let margin = (region.width.min(region.height) * PADDING_RATIO).max(MIN_PADDING_PX);
    let padded = region.expand(margin).clamp_to(width, height);

    let x0 = padded.x.floor() as u32;
    let y0 = padded.y.floor() as u32;
    let x1 = (padded.right().ceil() as u32).min(width);
    let y1 = (padded.bottom().ceil() as u32).min(height);

    if x1 <= x0 || y1 <= y0 {
        return Err(OcrError::PreprocessingError(format!(
            "Region {:?} is empty after clamping to {}x{}",
            region, width, height
        )));
    }

    Ok(RegionCrop {
        image: image.crop_imm(x0, y0, x1 - x0, y1 - y0),
        bounds: BoundingBox::from_edges(x0 as f32, y0 as f32, x1 as f32, y1 as f32),
    })
}

/// Turn a crop into a `[1, height, width]` grayscale tensor on [0,1].
///
/// Crops narrower than `min_width` after resizing are right-padded with zeros.
pub fn recognition_tensor(crop: &DynamicImage, shape: &RecognitionShape) -> Result<Array3<f32>, OcrError> {
    let (w, h) = crop.dimensions();
    if w == 0 || h == 0 {
        return Err(OcrError::PreprocessingError("Empty region crop".to_string()));
    }

    let resized = resize::to_height(crop, shape.height, shape.max_width);
    let plane = grayscale::to_unit_luma(&resized);
    let (rows, cols) = plane.dim();

    let width = cols.max(shape.min_width as usize);
    let mut tensor = Array3::<f32>::zeros((1, rows, width));
    tensor.slice_mut(s![0, .., ..cols]).assign(&plane);

    Ok(tensor)
}

/// Crop `region` out of `image` and build its recognition tensor.
pub fn preprocess_for_recognition(
    image: &DynamicImage,
    region: &BoundingBox,
    shape: &RecognitionShape,
) -> Result<(RegionCrop, Array3<f32>), OcrError> {
    let crop = crop_region(image, region)?;
    let tensor = recognition_tensor(&crop.image, shape)?;
    Ok((crop, tensor))
}
