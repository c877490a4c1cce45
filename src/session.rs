//! Inference session abstraction shared by every numeric backend.
//!
//! The pipeline only ever talks to [`InferenceSession`]; the ONNX Runtime
//! implementation lives in [`crate::backend::ort`].

use crate::backend::Backend;
use crate::error::OcrError;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Runtime configuration applied to sessions created on the winning backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub backend: Backend,
    /// Intra-op thread count (vectorized backend only)
    pub intra_threads: Option<usize>,
    /// Let the runtime use its memory arena / SIMD-friendly layouts
    pub use_arena: bool,
}

impl SessionOptions {
    pub fn for_backend(backend: Backend) -> Self {
        Self {
            backend,
            intra_threads: None,
            use_arena: true,
        }
    }
}

/// A loaded model that can be executed with named inputs and outputs.
///
/// Dropping the session releases its native resources.
pub trait InferenceSession: Send {
    fn input_names(&self) -> Vec<String>;

    fn output_names(&self) -> Vec<String>;

    /// Run the model; returns every output keyed by name.
    fn run(
        &mut self,
        inputs: Vec<(String, ArrayD<f32>)>,
    ) -> Result<HashMap<String, ArrayD<f32>>, OcrError>;

    /// Convenience for single-input models: feeds `input` to the first input
    /// and returns the outputs in declaration order.
    fn run_single(&mut self, input: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, OcrError> {
        let input_name = self
            .input_names()
            .into_iter()
            .next()
            .ok_or_else(|| OcrError::InferenceError("Model declares no inputs".to_string()))?;

        let mut outputs = self.run(vec![(input_name, input)])?;

        self.output_names()
            .iter()
            .map(|name| {
                outputs.remove(name).ok_or_else(|| {
                    OcrError::InferenceError(format!("Model produced no output named '{}'", name))
                })
            })
            .collect()
    }
}

/// Creates sessions from model artifacts on disk
pub trait SessionLoader: Send + Sync {
    fn load(
        &self,
        path: &Path,
        options: &SessionOptions,
    ) -> Result<Box<dyn InferenceSession>, OcrError>;
}
