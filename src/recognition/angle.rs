//! Optional per-region rotation normalization before recognition.
//!
//! Four-class classifiers report the clockwise rotation of the text as
//! 0/90/180/270 degrees; two-class text-line classifiers report 0/180.
//! Correcting applies the inverse rotation.

use crate::error::OcrError;
use crate::preprocessing::{recognition_tensor, RecognitionShape};
use crate::session::InferenceSession;
use image::DynamicImage;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    Upright,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Map a classifier output index to a rotation given the class count.
    pub fn from_class(class: usize, num_classes: usize) -> Option<Self> {
        match (num_classes, class) {
            (2, 0) | (4, 0) => Some(Self::Upright),
            (2, 1) | (4, 2) => Some(Self::Cw180),
            (4, 1) => Some(Self::Cw90),
            (4, 3) => Some(Self::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Upright => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }

    /// Rotate `image` back to upright. Width and height swap at 90/270.
    pub fn undo(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Self::Upright => image.clone(),
            Self::Cw90 => image.rotate270(),
            Self::Cw180 => image.rotate180(),
            Self::Cw270 => image.rotate90(),
        }
    }
}

/// Run the classifier on a recognition tensor (`[1, H, W]`).
pub fn classify(
    session: &mut dyn InferenceSession,
    tensor: &Array3<f32>,
) -> Result<Rotation, OcrError> {
    let input = tensor.clone().insert_axis(Axis(0)).into_dyn();
    let output = session
        .run_single(input)?
        .into_iter()
        .next()
        .ok_or_else(|| OcrError::InferenceError("Angle classifier produced no output".to_string()))?;

    let scores: Vec<f32> = output.iter().copied().collect();
    let num_classes = scores.len();
    let best = scores
        .iter()
        .enumerate()
        .fold(None::<(usize, f32)>, |best, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| OcrError::InferenceError("Angle classifier output is empty".to_string()))?;

    Rotation::from_class(best, num_classes).ok_or_else(|| {
        OcrError::InferenceError(format!(
            "Angle classifier returned {} classes; expected 2 or 4",
            num_classes
        ))
    })
}

/// A recognition tensor, possibly rotated upright
#[derive(Debug, Clone)]
pub struct Corrected {
    pub tensor: Array3<f32>,
    pub rotation: Rotation,
    /// Set when classification failed and the crop was left as is
    pub diagnostic: Option<String>,
}

/// Normalize the rotation of `crop`. Never fails: classifier errors are
/// logged and recorded, and the uncorrected tensor is returned.
pub fn correct(
    classifier: Option<&mut dyn InferenceSession>,
    crop: &DynamicImage,
    tensor: Array3<f32>,
    shape: &RecognitionShape,
) -> Corrected {
    let Some(session) = classifier else {
        return upright(tensor, None);
    };

    match classify(session, &tensor) {
        Ok(Rotation::Upright) => upright(tensor, None),
        Ok(rotation) => match recognition_tensor(&rotation.undo(crop), shape) {
            Ok(rotated) => Corrected {
                tensor: rotated,
                rotation,
                diagnostic: None,
            },
            Err(e) => skipped(tensor, e),
        },
        Err(e) => skipped(tensor, e),
    }
}

fn upright(tensor: Array3<f32>, diagnostic: Option<String>) -> Corrected {
    Corrected {
        tensor,
        rotation: Rotation::Upright,
        diagnostic,
    }
}

fn skipped(tensor: Array3<f32>, error: OcrError) -> Corrected {
    tracing::warn!(error = %error, "Angle correction failed, using uncorrected crop");
    upright(tensor, Some(format!("angle correction skipped: {}", error)))
}
