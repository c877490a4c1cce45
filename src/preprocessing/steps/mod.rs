//! Individual preprocessing steps

pub mod grayscale;
pub mod normalize;
pub mod resize;
