//! Text recognition: rotation normalization, model execution and CTC decoding

pub mod angle;
pub mod ctc;

use crate::error::OcrError;
use crate::models::Charset;
use crate::result::sanitize_confidence;
use crate::session::InferenceSession;
use ndarray::{Array3, Axis};

/// Decoded text of a single region
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
    pub diagnostics: Vec<String>,
}

/// Run the recognition model on a `[1, H, W]` tensor and decode its output.
pub fn recognize(
    session: &mut dyn InferenceSession,
    tensor: Array3<f32>,
    charset: &Charset,
) -> Result<RecognizedText, OcrError> {
    let input = tensor.insert_axis(Axis(0)).into_dyn();
    tracing::trace!(shape = ?input.shape(), "Running recognition model");

    let output = session
        .run_single(input)?
        .into_iter()
        .next()
        .ok_or_else(|| OcrError::InferenceError("Recognition model produced no output".to_string()))?;

    let sequence = ctc::to_sequence(output)?;
    let decoded = ctc::greedy_decode(sequence.view(), charset);

    Ok(RecognizedText {
        text: decoded.text,
        confidence: decoded.confidence,
        diagnostics: decoded.diagnostics,
    })
}

/// A region is only as trustworthy as its weakest stage.
#[inline]
pub fn region_confidence(detection: f32, recognition: f32) -> f32 {
    sanitize_confidence(detection.min(recognition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use std::collections::HashMap;

    /// Emits "ab" with probability 0.8 per symbol; blank is class 2
    struct AbSession;

    impl InferenceSession for AbSession {
        fn input_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }
        fn output_names(&self) -> Vec<String> {
            vec!["logits".to_string()]
        }
        fn run(
            &mut self,
            _inputs: Vec<(String, ArrayD<f32>)>,
        ) -> Result<HashMap<String, ArrayD<f32>>, OcrError> {
            let rows = vec![
                0.8, 0.1, 0.1, //
                0.1, 0.1, 0.8, //
                0.1, 0.8, 0.1,
            ];
            let out = ArrayD::from_shape_vec(IxDyn(&[1, 3, 3]), rows).unwrap();
            Ok(HashMap::from([("logits".to_string(), out)]))
        }
    }

    #[test]
    fn test_recognize_decodes_model_output() {
        let charset = Charset::from_symbols(["a".to_string(), "b".to_string()]);
        let result = recognize(&mut AbSession, Array3::zeros((1, 48, 128)), &charset).unwrap();
        assert_eq!(result.text, "ab");
        assert!((result.confidence - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_region_confidence_is_minimum() {
        assert_eq!(region_confidence(0.9, 0.6), 0.6);
        assert_eq!(region_confidence(0.4, 0.6), 0.4);
        assert_eq!(region_confidence(f32::NAN, 0.6), 0.6);
    }
}
