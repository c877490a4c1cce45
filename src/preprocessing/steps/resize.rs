use crate::error::OcrError;
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use serde::Serialize;

/// Scale and padding applied when letterboxing into a square canvas.
///
/// Scales are per axis: the resized sides are rounded to whole pixels, so the
/// applied ratio differs slightly between width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LetterboxTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl LetterboxTransform {
    /// Map a point from canvas space back into original-image space
    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) / self.scale_x,
            (y - self.offset_y) / self.scale_y,
        )
    }
}

/// Resize into a `canvas` x `canvas` square, preserving aspect ratio, and
/// center the result on a black background.
pub fn letterbox(image: &DynamicImage, canvas: u32) -> Result<(RgbImage, LetterboxTransform), OcrError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || canvas == 0 {
        return Err(OcrError::PreprocessingError(format!(
            "Cannot letterbox {}x{} image into {}px canvas",
            width, height, canvas
        )));
    }

    let scale = (canvas as f32 / width as f32).min(canvas as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, canvas);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, canvas);

    let offset_x = (canvas - new_width) / 2;
    let offset_y = (canvas - new_height) / 2;

    let resized = image
        .resize_exact(new_width, new_height, FilterType::Triangle)
        .to_rgb8();

    let mut padded = RgbImage::new(canvas, canvas);
    image::imageops::replace(&mut padded, &resized, offset_x as i64, offset_y as i64);

    Ok((
        padded,
        LetterboxTransform {
            scale_x: new_width as f32 / width as f32,
            scale_y: new_height as f32 / height as f32,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        },
    ))
}

/// Resize to a fixed height preserving aspect ratio; the resulting width is
/// limited to `max_width`.
pub fn to_height(image: &DynamicImage, height: u32, max_width: u32) -> DynamicImage {
    let (w, h) = image.dimensions();
    let scaled = (w as f32 * height as f32 / h.max(1) as f32).round() as u32;
    let target_width = scaled.clamp(1, max_width.max(1));
    image.resize_exact(target_width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use proptest::prelude::*;

    #[test]
    fn test_letterbox_wide_image_pads_vertically() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 255, 255])));
        let (canvas, t) = letterbox(&img, 640).unwrap();

        assert_eq!(canvas.dimensions(), (640, 640));
        assert!((t.scale_x - 3.2).abs() < 1e-6);
        assert!((t.scale_y - 3.2).abs() < 1e-6);
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 160.0);
        // Padding is black, content is white
        assert_eq!(canvas.get_pixel(10, 10), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(320, 320), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_letterbox_rejects_empty_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
        assert!(letterbox(&img, 640).is_err());
    }

    #[test]
    fn test_rounded_side_maps_back_to_image_edge() {
        // 1015 * 0.1 is rounded to a whole number of canvas rows
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(6400, 1015, Rgb([255, 255, 255])));
        let (padded, t) = letterbox(&img, 640).unwrap();
        let (_, _, right, bottom) = content_extent(&padded);

        let (x, y) = t.inverse(right as f32, bottom as f32);
        assert!((x - 6400.0).abs() < 1.0);
        assert!((y - 1015.0).abs() < 1.0);
    }

    #[test]
    fn test_to_height_caps_width() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(1000, 10));
        let resized = to_height(&img, 48, 320);
        assert_eq!(resized.dimensions(), (320, 48));
    }

    /// Bounding box of the non-black pixels of `canvas`
    fn content_extent(canvas: &RgbImage) -> (u32, u32, u32, u32) {
        let lit = canvas
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 != [0, 0, 0])
            .map(|(x, y, _)| (x, y));
        lit.fold((u32::MAX, u32::MAX, 0, 0), |(l, t, r, b), (x, y)| {
            (l.min(x), t.min(y), r.max(x + 1), b.max(y + 1))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_content_edges_map_back_to_image_edges(
            width in 1u32..1200,
            height in 1u32..1200,
            canvas in 16u32..256,
        ) {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])));
            let (padded, t) = letterbox(&img, canvas).unwrap();
            let (left, top, right, bottom) = content_extent(&padded);

            let (x0, y0) = t.inverse(left as f32, top as f32);
            let (x1, y1) = t.inverse(right as f32, bottom as f32);
            prop_assert!(x0.abs() <= 1.0 && y0.abs() <= 1.0);
            prop_assert!((x1 - width as f32).abs() <= 1.0, "right edge {} vs {}", x1, width);
            prop_assert!((y1 - height as f32).abs() <= 1.0, "bottom edge {} vs {}", y1, height);
        }

        #[test]
        fn prop_inverse_undoes_any_scale_and_offset(
            scale_x in 0.01f32..10.0,
            scale_y in 0.01f32..10.0,
            offset_x in 0.0f32..500.0,
            offset_y in 0.0f32..500.0,
            x in 0.0f32..4000.0,
            y in 0.0f32..4000.0,
        ) {
            let t = LetterboxTransform { scale_x, scale_y, offset_x, offset_y };
            let (ix, iy) = t.inverse(x * scale_x + offset_x, y * scale_y + offset_y);
            prop_assert!((ix - x).abs() <= 1e-2 * x.max(1.0));
            prop_assert!((iy - y).abs() <= 1e-2 * y.max(1.0));
        }
    }
}
