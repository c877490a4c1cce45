//! In-process stand-ins for backends, model sessions and the secondary engine

#![allow(dead_code)]

use async_trait::async_trait;
use image::DynamicImage;
use ndarray::{ArrayD, IxDyn};
use ocr_inference_engine::{
    Backend, BackendProbe, BoundingBox, Engine, EngineConfig, InferenceSession, ModelSources,
    OcrError, SecondaryEngine, SecondaryFactory, SecondaryOutput, SecondaryWord, SessionLoader,
    SessionOptions,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const CANVAS: u32 = 64;

/// Probe that passes or fails after an optional delay, counting calls
pub struct CountingProbe {
    pub backend: Backend,
    pub pass: bool,
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl BackendProbe for CountingProbe {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn probe(&self) -> Result<SessionOptions, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.pass {
            Ok(SessionOptions::for_backend(self.backend))
        } else {
            Err(OcrError::InitializationError(format!("{} unsupported", self.backend)))
        }
    }
}

/// Detector on a 64x64 canvas with 16x16 output maps and one box at (6,10) 40x12
pub struct OneBoxDetector {
    pub fail: Arc<AtomicBool>,
}

impl InferenceSession for OneBoxDetector {
    fn input_names(&self) -> Vec<String> {
        vec!["image".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["score".to_string(), "geometry".to_string()]
    }

    fn run(
        &mut self,
        _inputs: Vec<(String, ArrayD<f32>)>,
    ) -> Result<HashMap<String, ArrayD<f32>>, OcrError> {
        // One-shot failure
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(OcrError::InferenceError("detector crashed".to_string()));
        }
        let mut score = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 16, 16]));
        score[[0, 0, 4, 4]] = 0.95;
        let mut geometry = ArrayD::<f32>::zeros(IxDyn(&[1, 5, 16, 16]));
        for (c, d) in [6.0, 30.0, 6.0, 10.0].into_iter().enumerate() {
            geometry[[0, c, 4, 4]] = d;
        }
        Ok(HashMap::from([
            ("score".to_string(), score),
            ("geometry".to_string(), geometry),
        ]))
    }
}

/// Recognizer reading "hi" at probability 0.9
pub struct HiRecognizer {
    pub fail: bool,
}

impl InferenceSession for HiRecognizer {
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
        if self.fail {
            return Err(OcrError::InferenceError("recognizer crashed".to_string()));
        }
        let rows = vec![
            0.9, 0.05, 0.05, //
            0.05, 0.9, 0.05,
        ];
        let out = ArrayD::from_shape_vec(IxDyn(&[1, 2, 3]), rows)
            .map_err(|e| OcrError::InferenceError(e.to_string()))?;
        Ok(HashMap::from([("logits".to_string(), out)]))
    }
}

/// Hands out mock sessions by artifact file name
#[derive(Default)]
pub struct MockLoader {
    pub detector_fails: Arc<AtomicBool>,
    pub recognizer_fails: bool,
    pub loads: Arc<AtomicUsize>,
}

impl SessionLoader for MockLoader {
    fn load(
        &self,
        path: &Path,
        _options: &SessionOptions,
    ) -> Result<Box<dyn InferenceSession>, OcrError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match path.file_stem().and_then(|s| s.to_str()) {
            Some("detection") => Ok(Box::new(OneBoxDetector {
                fail: Arc::clone(&self.detector_fails),
            })),
            Some("recognition") => Ok(Box::new(HiRecognizer {
                fail: self.recognizer_fails,
            })),
            other => Err(OcrError::ModelLoadError(format!("unexpected model {:?}", other))),
        }
    }
}

/// Secondary engine returning one fixed word
pub struct StubSecondary {
    pub fail: bool,
}

impl SecondaryEngine for StubSecondary {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<SecondaryOutput, OcrError> {
        if self.fail {
            return Err(OcrError::InferenceError("secondary crashed".to_string()));
        }
        Ok(SecondaryOutput {
            text: "fallback".to_string(),
            confidence: 0.7,
            words: vec![SecondaryWord {
                text: "fallback".to_string(),
                confidence: 0.7,
                bbox: BoundingBox::new(2.0, 2.0, 20.0, 8.0),
            }],
        })
    }
}

#[derive(Default)]
pub struct StubFactory {
    pub fail_create: bool,
    pub fail_recognize: bool,
    pub creates: Arc<AtomicUsize>,
}

impl SecondaryFactory for StubFactory {
    fn create(&self) -> Result<Arc<dyn SecondaryEngine>, OcrError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(OcrError::InitializationError("secondary unavailable".to_string()));
        }
        Ok(Arc::new(StubSecondary {
            fail: self.fail_recognize,
        }))
    }
}

/// Model directory with placeholder artifacts and a two-symbol charset
pub fn model_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let filler = vec![0u8; 32 * 1024];
    std::fs::write(dir.path().join("detection.onnx"), &filler).unwrap();
    std::fs::write(dir.path().join("recognition.onnx"), &filler).unwrap();
    std::fs::write(dir.path().join("charset.txt"), "h\ni\n").unwrap();
    dir
}

pub fn engine_config(models: &TempDir) -> EngineConfig {
    EngineConfig {
        models: Some(ModelSources::from_dir(models.path())),
        canvas_size: CANVAS,
        probe_timeout_ms: 1_000,
        ..EngineConfig::default()
    }
}

pub fn passing_probe(backend: Backend, calls: &Arc<AtomicUsize>) -> Box<dyn BackendProbe> {
    Box::new(CountingProbe {
        backend,
        pass: true,
        delay: Duration::ZERO,
        calls: Arc::clone(calls),
    })
}

pub fn failing_probe(backend: Backend, calls: &Arc<AtomicUsize>) -> Box<dyn BackendProbe> {
    Box::new(CountingProbe {
        backend,
        pass: false,
        delay: Duration::ZERO,
        calls: Arc::clone(calls),
    })
}

/// Engine on the vectorized backend with mock sessions and secondary
pub fn engine(config: EngineConfig, loader: MockLoader, factory: StubFactory) -> Engine {
    let calls = Arc::new(AtomicUsize::new(0));
    Engine::builder(config)
        .probes(vec![passing_probe(Backend::Vectorized, &calls)])
        .session_loader(Arc::new(loader))
        .secondary_factory(Arc::new(factory))
        .build()
}

pub fn blank_image() -> DynamicImage {
    DynamicImage::new_rgb8(CANVAS, CANVAS)
}

/// PNG bytes of [`blank_image`]
pub fn blank_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    blank_image()
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}
