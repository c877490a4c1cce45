use image::RgbImage;
use ndarray::Array4;

/// Per-channel mean on [0,1] (ImageNet statistics)
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation on [0,1]
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalize each channel independently and lay the pixels out as a
/// `[1, 3, height, width]` CHW tensor.
pub fn to_chw_tensor(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel.0[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - mean[c]) / std[c];
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_channels_normalized_independently() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 128]));
        let t = to_chw_tensor(&img, CHANNEL_MEAN, CHANNEL_STD);

        assert_eq!(t.shape(), &[1, 3, 2, 2]);
        assert!((t[[0, 0, 1, 1]] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((t[[0, 1, 0, 0]] - (0.0 - 0.456) / 0.224).abs() < 1e-5);
        assert!((t[[0, 2, 0, 1]] - (128.0 / 255.0 - 0.406) / 0.225).abs() < 1e-5);
    }

    #[test]
    fn test_identity_statistics_keep_unit_range() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        let t = to_chw_tensor(&img, [0.0; 3], [1.0; 3]);
        assert!(t.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
