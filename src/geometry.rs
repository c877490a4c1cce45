//! Axis-aligned boxes in pixel space.

use serde::{Deserialize, Serialize};

/// Bounding box in pixel coordinates (top-left corner plus size)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from its left/top/right/bottom edges.
    pub fn from_edges(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Ratio of the long side to the short side. Infinite for degenerate boxes.
    pub fn aspect_ratio(&self) -> f32 {
        let long = self.width.max(self.height);
        let short = self.width.min(self.height);
        if short <= 0.0 {
            f32::INFINITY
        } else {
            long / short
        }
    }

    /// Intersection over Union with another box
    #[inline]
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Clamp the box so it lies within a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let left = self.x.clamp(0.0, w);
        let top = self.y.clamp(0.0, h);
        let right = self.right().clamp(left, w);
        let bottom = self.bottom().clamp(top, h);
        Self::from_edges(left, top, right, bottom)
    }

    /// Grow the box by `margin` pixels on every side.
    pub fn expand(&self, margin: f32) -> Self {
        Self::from_edges(
            self.x - margin,
            self.y - margin,
            self.right() + margin,
            self.bottom() + margin,
        )
    }

    /// Whether the box lies inside a `width` x `height` image.
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= width as f32
            && self.bottom() <= height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        // Intersection 10x10 = 100, union 200 + 200 - 100 = 300
        let a = BoundingBox::new(0.0, 0.0, 20.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_keeps_box_inside_image() {
        let b = BoundingBox::new(-5.0, 90.0, 30.0, 40.0).clamp_to(100, 100);
        assert_eq!(b, BoundingBox::new(0.0, 90.0, 25.0, 10.0));
        assert!(b.is_within(100, 100));
    }

    #[test]
    fn test_clamp_fully_outside_collapses() {
        let b = BoundingBox::new(150.0, 150.0, 10.0, 10.0).clamp_to(100, 100);
        assert!(b.is_within(100, 100));
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn test_aspect_ratio() {
        assert_eq!(BoundingBox::new(0.0, 0.0, 40.0, 2.0).aspect_ratio(), 20.0);
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 2.0).aspect_ratio().is_infinite());
    }
}
