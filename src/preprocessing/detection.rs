use super::steps::{normalize, resize};
use super::LetterboxTransform;
use crate::error::OcrError;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;

/// Detection model input together with what is needed to undo the letterbox
#[derive(Debug, Clone)]
pub struct DetectionInput {
    /// `[1, 3, canvas, canvas]` normalized CHW tensor
    pub tensor: Array4<f32>,
    pub transform: LetterboxTransform,
    pub canvas_size: u32,
    pub image_width: u32,
    pub image_height: u32,
}

/// Letterbox `image` into a `canvas_size` square and normalize it.
pub fn preprocess_for_detection(
    image: &DynamicImage,
    canvas_size: u32,
) -> Result<DetectionInput, OcrError> {
    let (image_width, image_height) = image.dimensions();
    let (canvas, transform) = resize::letterbox(image, canvas_size)?;
    let tensor = normalize::to_chw_tensor(&canvas, normalize::CHANNEL_MEAN, normalize::CHANNEL_STD);

    tracing::debug!(
        image_width,
        image_height,
        scale_x = transform.scale_x,
        scale_y = transform.scale_y,
        offset_x = transform.offset_x,
        offset_y = transform.offset_y,
        "Prepared detection input"
    );

    Ok(DetectionInput {
        tensor,
        transform,
        canvas_size,
        image_width,
        image_height,
    })
}
