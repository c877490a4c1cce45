//! Greedy CTC decoding
//!
//! The last class index is the blank. A timestep's arg-max is emitted when it
//! is not blank and differs from the previous timestep's arg-max.

use crate::error::OcrError;
use crate::models::Charset;
use crate::result::sanitize_confidence;
use ndarray::{ArrayD, ArrayView1, ArrayView2, Axis, Ix2};

/// Floor applied to probabilities before taking their logarithm
pub const PROBABILITY_FLOOR: f32 = 1e-10;

/// Emitted for class indices the charset does not cover
pub const UNKNOWN_SYMBOL: &str = "\u{FFFD}";

/// Result of decoding one logits sequence
#[derive(Debug, Clone, PartialEq)]
pub struct CtcDecoding {
    /// Kept class indices, in order
    pub indices: Vec<usize>,
    pub text: String,
    /// Geometric mean of the kept symbols' probabilities, in [0,1]
    pub confidence: f32,
    /// Anomalies met while mapping indices to symbols
    pub diagnostics: Vec<String>,
}

/// Reduce a recognition output to `[T, C]`, accepting a leading batch axis of 1.
pub fn to_sequence(output: ArrayD<f32>) -> Result<ndarray::Array2<f32>, OcrError> {
    let output = match output.ndim() {
        2 => output,
        3 if output.shape()[0] == 1 => output.index_axis_move(Axis(0), 0),
        _ => {
            return Err(OcrError::InferenceError(format!(
                "Unexpected recognition output shape {:?}",
                output.shape()
            )))
        }
    };
    output
        .into_dimensionality::<Ix2>()
        .map_err(|e| OcrError::InferenceError(e.to_string()))
}

/// Rows that already sum to one with entries in [0,1] are probabilities;
/// anything else is treated as logits and passed through a softmax.
fn probabilities(row: ArrayView1<f32>) -> Vec<f32> {
    let sum: f32 = row.sum();
    let is_distribution = row.iter().all(|&p| (0.0..=1.0).contains(&p)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        return row.to_vec();
    }

    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Arg-max of a row; the first maximum wins on ties.
fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Geometric mean of `probabilities`, each floored at [`PROBABILITY_FLOOR`].
/// Empty input has zero confidence.
pub fn geometric_mean(probabilities: &[f32]) -> f32 {
    if probabilities.is_empty() {
        return 0.0;
    }
    let log_sum: f32 = probabilities
        .iter()
        .map(|&p| {
            let p = if p.is_nan() { 0.0 } else { p };
            p.max(PROBABILITY_FLOOR).ln()
        })
        .sum();
    sanitize_confidence((log_sum / probabilities.len() as f32).exp())
}

/// Greedy CTC decode of a `[T, C]` sequence.
pub fn greedy_decode(logits: ArrayView2<f32>, charset: &Charset) -> CtcDecoding {
    let num_classes = logits.ncols();
    let blank = num_classes.saturating_sub(1);

    let mut indices = Vec::new();
    let mut symbol_confidences = Vec::new();
    let mut diagnostics = Vec::new();
    let mut text = String::new();
    let mut previous: Option<usize> = None;

    for row in logits.rows() {
        let probs = probabilities(row);
        let best = argmax(&probs);

        if best != blank && previous != Some(best) {
            indices.push(best);
            symbol_confidences.push(probs[best]);

            match charset.symbol(best) {
                Some(symbol) => text.push_str(symbol),
                None => {
                    text.push_str(UNKNOWN_SYMBOL);
                    diagnostics.push(format!(
                        "class index {} outside charset of {} symbols",
                        best,
                        charset.len()
                    ));
                }
            }
        }

        previous = Some(best);
    }

    if !diagnostics.is_empty() {
        tracing::warn!(
            unknown = diagnostics.len(),
            charset_len = charset.len(),
            num_classes,
            "Recognition produced indices outside the charset"
        );
    }

    CtcDecoding {
        confidence: geometric_mean(&symbol_confidences),
        indices,
        text,
        diagnostics,
    }
}
