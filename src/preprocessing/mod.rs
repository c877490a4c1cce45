//! Image preprocessing for the detection and recognition models
//!
//! Both entry points are pure: the same image always yields the same tensor
//! and metadata.

pub mod detection;
pub mod recognition;
pub mod steps;

pub use detection::{preprocess_for_detection, DetectionInput};
pub use recognition::{crop_region, preprocess_for_recognition, recognition_tensor, RecognitionShape, RegionCrop};
pub use steps::resize::LetterboxTransform;
