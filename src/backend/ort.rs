//! ONNX Runtime backends
//!
//! Each [`Backend`] maps to one execution provider: CUDA for
//! [`Backend::GpuCompute`], DirectML for [`Backend::GpuShader`] and the CPU
//! provider for [`Backend::Vectorized`]. GPU providers are only compiled in
//! with the `cuda` / `directml` cargo features.

use super::{Backend, BackendProbe};
use crate::error::OcrError;
use crate::session::{InferenceSession, SessionLoader, SessionOptions};
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Build the execution provider list for a backend
fn execution_providers(options: &SessionOptions) -> Result<Vec<ExecutionProviderDispatch>, OcrError> {
    match options.backend {
        #[cfg(feature = "cuda")]
        Backend::GpuCompute => Ok(vec![ort::execution_providers::CUDAExecutionProvider::default()
            .build()
            .error_on_failure()]),
        #[cfg(not(feature = "cuda"))]
        Backend::GpuCompute => Err(OcrError::InitializationError(
            "CUDA support not compiled in (enable the `cuda` feature)".to_string(),
        )),
        #[cfg(feature = "directml")]
        Backend::GpuShader => Ok(vec![
            ort::execution_providers::DirectMLExecutionProvider::default()
                .build()
                .error_on_failure(),
        ]),
        #[cfg(not(feature = "directml"))]
        Backend::GpuShader => Err(OcrError::InitializationError(
            "DirectML support not compiled in (enable the `directml` feature)".to_string(),
        )),
        Backend::Vectorized => Ok(vec![CPUExecutionProvider::default()
            .with_arena_allocator(options.use_arena)
            .build()]),
        Backend::Secondary => Err(OcrError::InitializationError(
            "The secondary engine has no numeric session".to_string(),
        )),
    }
}

/// Platform feature check for a backend's execution provider
fn provider_available(backend: Backend) -> Result<bool, OcrError> {
    #[allow(unused_imports)]
    use ort::execution_providers::ExecutionProvider;

    let check = |r: ort::Result<bool>| {
        r.map_err(|e| OcrError::InitializationError(format!("Provider check failed: {}", e)))
    };

    match backend {
        #[cfg(feature = "cuda")]
        Backend::GpuCompute => check(ort::execution_providers::CUDAExecutionProvider::default().is_available()),
        #[cfg(feature = "directml")]
        Backend::GpuShader => {
            check(ort::execution_providers::DirectMLExecutionProvider::default().is_available())
        }
        Backend::Vectorized => check(CPUExecutionProvider::default().is_available()),
        _ => Ok(false),
    }
}

/// Serialized `y = Identity(x)` graph over a float `[1, 4]` tensor, opset 13
const IDENTITY_MODEL: &[u8] = &[
    0x08, 0x07, 0x12, 0x14, 0x6f, 0x63, 0x72, 0x2d, 0x69, 0x6e, 0x66, 0x65,
    0x72, 0x65, 0x6e, 0x63, 0x65, 0x2d, 0x65, 0x6e, 0x67, 0x69, 0x6e, 0x65,
    0x3a, 0x46, 0x0a, 0x10, 0x0a, 0x01, 0x78, 0x12, 0x01, 0x79, 0x22, 0x08,
    0x49, 0x64, 0x65, 0x6e, 0x74, 0x69, 0x74, 0x79, 0x12, 0x08, 0x69, 0x64,
    0x65, 0x6e, 0x74, 0x69, 0x74, 0x79, 0x5a, 0x13, 0x0a, 0x01, 0x78, 0x12,
    0x0e, 0x0a, 0x0c, 0x08, 0x01, 0x12, 0x08, 0x0a, 0x02, 0x08, 0x01, 0x0a,
    0x02, 0x08, 0x04, 0x62, 0x13, 0x0a, 0x01, 0x79, 0x12, 0x0e, 0x0a, 0x0c,
    0x08, 0x01, 0x12, 0x08, 0x0a, 0x02, 0x08, 0x01, 0x0a, 0x02, 0x08, 0x04,
    0x42, 0x02, 0x10, 0x0d,
];

/// Where a session's model comes from
#[derive(Clone, Copy)]
enum ModelData<'a> {
    File(&'a Path),
    Memory(&'a [u8]),
}

impl ModelData<'_> {
    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }
}

fn build_session(model: ModelData<'_>, options: &SessionOptions) -> Result<Session, OcrError> {
    let load_err = |e: ort::Error| {
        OcrError::ModelLoadError(format!("Failed to load {}: {}", model.describe(), e))
    };

    let mut builder = Session::builder()
        .map_err(load_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load_err)?;

    if let Some(threads) = options.intra_threads {
        builder = builder.with_intra_threads(threads).map_err(load_err)?;
    }

    let builder = builder
        .with_execution_providers(execution_providers(options)?)
        .map_err(load_err)?;

    let session = match model {
        ModelData::File(path) => builder.commit_from_file(path),
        ModelData::Memory(bytes) => builder.commit_from_memory(bytes),
    };
    session.map_err(load_err)
}

/// A model loaded into ONNX Runtime
pub struct OrtSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OrtSession {
    pub fn load(path: &Path, options: &SessionOptions) -> Result<Self, OcrError> {
        Self::build(ModelData::File(path), options)
    }

    /// Load a model from its serialized bytes
    pub fn from_memory(bytes: &[u8], options: &SessionOptions) -> Result<Self, OcrError> {
        Self::build(ModelData::Memory(bytes), options)
    }

    fn build(model: ModelData<'_>, options: &SessionOptions) -> Result<Self, OcrError> {
        let session = build_session(model, options)?;
        let input_names = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

        tracing::debug!(
            model = %model.describe(),
            backend = %options.backend,
            inputs = ?input_names,
            outputs = ?output_names,
            "Loaded ONNX session"
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }
}

impl InferenceSession for OrtSession {
    fn input_names(&self) -> Vec<String> {
        self.input_names.clone()
    }

    fn output_names(&self) -> Vec<String> {
        self.output_names.clone()
    }

    fn run(
        &mut self,
        inputs: Vec<(String, ArrayD<f32>)>,
    ) -> Result<HashMap<String, ArrayD<f32>>, OcrError> {
        let infer_err = |e: ort::Error| OcrError::InferenceError(e.to_string());

        let mut values = Vec::with_capacity(inputs.len());
        for (name, array) in inputs {
            let shape = array.shape().to_vec();
            let data = array.as_standard_layout().iter().copied().collect::<Vec<f32>>();
            let value = Tensor::from_array((shape, data)).map_err(infer_err)?;
            values.push((name, value));
        }

        let outputs = self.session.run(values).map_err(infer_err)?;

        let mut result = HashMap::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(infer_err)?;
            let dims = shape.iter().map(|&d| d as usize).collect::<Vec<_>>();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
                .map_err(|e| OcrError::InferenceError(format!("Bad output shape: {}", e)))?;
            result.insert(name.clone(), array);
        }

        Ok(result)
    }
}

/// Loads ONNX models as [`OrtSession`]s
#[derive(Debug, Default, Clone)]
pub struct OrtSessionLoader;

impl SessionLoader for OrtSessionLoader {
    fn load(
        &self,
        path: &Path,
        options: &SessionOptions,
    ) -> Result<Box<dyn InferenceSession>, OcrError> {
        Ok(Box::new(OrtSession::load(path, options)?))
    }
}

/// Capability probe for one ONNX Runtime execution provider
pub struct OrtProbe {
    backend: Backend,
    identity_model: Option<PathBuf>,
    intra_threads: Option<usize>,
}

impl OrtProbe {
    pub fn new(backend: Backend, identity_model: Option<PathBuf>, intra_threads: Option<usize>) -> Self {
        Self {
            backend,
            identity_model,
            intra_threads,
        }
    }

    /// One probe per backend in [`Backend::PRIORITY`] order
    pub fn default_chain(
        identity_model: Option<PathBuf>,
        intra_threads: Option<usize>,
    ) -> Vec<Box<dyn BackendProbe>> {
        Backend::PRIORITY
            .iter()
            .map(|&backend| {
                Box::new(OrtProbe::new(backend, identity_model.clone(), intra_threads))
                    as Box<dyn BackendProbe>
            })
            .collect()
    }

    fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::for_backend(self.backend);
        if self.backend == Backend::Vectorized {
            options.intra_threads = self.intra_threads;
        }
        options
    }
}

/// Feed a 1x4 ramp through an identity model and check it comes back intact.
///
/// Uses the model at `path` when one is configured and the embedded graph
/// otherwise.
fn run_identity(path: Option<&Path>, options: &SessionOptions) -> Result<(), OcrError> {
    let mut session = match path {
        Some(path) => OrtSession::load(path, options)?,
        None => OrtSession::from_memory(IDENTITY_MODEL, options)?,
    };
    let input = ArrayD::from_shape_vec(IxDyn(&[1, 4]), vec![0.0, 1.0, 2.0, 3.0])
        .map_err(|e| OcrError::Internal(e.to_string()))?;

    let outputs = session.run_single(input.clone())?;
    let output = outputs
        .first()
        .ok_or_else(|| OcrError::InferenceError("Identity model returned nothing".to_string()))?;

    if output.iter().zip(input.iter()).all(|(a, b)| (a - b).abs() < 1e-4)
        && output.len() == input.len()
    {
        Ok(())
    } else {
        Err(OcrError::InferenceError(
            "Identity model returned unexpected values".to_string(),
        ))
    }
}

#[async_trait]
impl BackendProbe for OrtProbe {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn probe(&self) -> Result<SessionOptions, OcrError> {
        if !provider_available(self.backend)? {
            return Err(OcrError::InitializationError(format!(
                "{} execution provider is not available on this platform",
                self.backend
            )));
        }

        let options = self.session_options();

        let model = self.identity_model.clone();
        let opts = options.clone();
        tokio::task::spawn_blocking(move || run_identity(model.as_deref(), &opts))
            .await
            .map_err(|e| OcrError::Internal(format!("Probe task failed: {}", e)))??;

        Ok(options)
    }
}
