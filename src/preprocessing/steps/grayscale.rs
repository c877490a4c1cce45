use image::DynamicImage;
use ndarray::Array2;

/// ITU-R BT.601 luma weights
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    LUMA_WEIGHTS[0] * r as f32 + LUMA_WEIGHTS[1] * g as f32 + LUMA_WEIGHTS[2] * b as f32
}

/// Convert to a grayscale `[height, width]` plane scaled to [0,1]
pub fn to_unit_luma(image: &DynamicImage) -> Array2<f32> {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        let p = rgb.get_pixel(x as u32, y as u32).0;
        (luma(p[0], p[1], p[2]) / 255.0).clamp(0.0, 1.0)
    })
}
