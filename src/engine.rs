//! The OCR engine facade
//!
//! [`Engine`] ties backend selection, model loading, the primary pipeline and
//! the secondary engine together behind the lifecycle in [`crate::fallback`].
//! Handles are cheap to clone and share one engine.

use crate::backend::ort::{OrtProbe, OrtSessionLoader};
use crate::backend::{Backend, BackendProbe, BackendSelector};
use crate::config::{EngineConfig, ProcessOptions};
use crate::engines::{DefaultSecondaryFactory, SecondaryEngine, SecondaryFactory};
use crate::error::OcrError;
use crate::fallback::{transition, EngineEvent, EngineState};
use crate::geometry::BoundingBox;
use crate::models::{ModelSet, ModelSources};
use crate::pipeline::{self, PipelineSettings};
use crate::progress::{ProgressEvent, ProgressSender};
use crate::result::OcrResult;
use crate::session::{SessionLoader, SessionOptions};
use futures::future::{BoxFuture, FutureExt, Shared};
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome of [`Engine::initialize`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitStatus {
    pub initialized: bool,
    pub backend: Backend,
    pub using_fallback: bool,
}

/// Snapshot of the engine's lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub initialized: bool,
    pub backend: Option<Backend>,
    pub using_fallback: bool,
    pub models_loaded: bool,
    pub state: EngineState,
}

/// Stop waiting for `future` after `duration`.
///
/// The underlying work is not cancelled once native inference has started;
/// it runs to completion in the background.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, OcrError>
where
    F: Future<Output = Result<T, OcrError>>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| OcrError::TimeoutError(duration.as_millis() as u64))?
}

type InitFuture = Shared<BoxFuture<'static, Result<InitStatus, OcrError>>>;

/// What a successful initialization produced
enum Started {
    Primary {
        options: SessionOptions,
        models: Option<ModelSet>,
    },
    Fallback(Arc<dyn SecondaryEngine>),
}

/// Resources used by `process*()`; one operation at a time
#[derive(Default)]
struct Runtime {
    session_options: Option<SessionOptions>,
    models: Option<Arc<Mutex<ModelSet>>>,
    secondary: Option<Arc<dyn SecondaryEngine>>,
}

/// The operation a caller asked for, retried verbatim on fallback
#[derive(Debug, Clone, Copy)]
enum Operation {
    Image,
    Region(BoundingBox),
}

struct Inner {
    config: EngineConfig,
    settings: PipelineSettings,
    selector: BackendSelector,
    loader: Arc<dyn SessionLoader>,
    secondary_factory: Arc<dyn SecondaryFactory>,
    progress: ProgressSender,
    state: Mutex<EngineState>,
    pending_init: Mutex<Option<InitFuture>>,
    runtime: tokio::sync::Mutex<Runtime>,
    models_loaded: AtomicBool,
}

/// Assembles an [`Engine`], optionally substituting its collaborators
pub struct EngineBuilder {
    config: EngineConfig,
    probes: Option<Vec<Box<dyn BackendProbe>>>,
    loader: Option<Arc<dyn SessionLoader>>,
    secondary_factory: Option<Arc<dyn SecondaryFactory>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            probes: None,
            loader: None,
            secondary_factory: None,
        }
    }

    /// Backend probes in priority order
    pub fn probes(mut self, probes: Vec<Box<dyn BackendProbe>>) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn session_loader(mut self, loader: Arc<dyn SessionLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn secondary_factory(mut self, factory: Arc<dyn SecondaryFactory>) -> Self {
        self.secondary_factory = Some(factory);
        self
    }

    pub fn build(self) -> Engine {
        let config = self.config;
        let probes = self.probes.unwrap_or_else(|| {
            OrtProbe::default_chain(config.identity_model.clone(), config.intra_threads)
        });
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(OrtSessionLoader));
        let secondary_factory = self.secondary_factory.unwrap_or_else(|| {
            Arc::new(DefaultSecondaryFactory::new(config.secondary_language.clone()))
        });

        Engine {
            inner: Arc::new(Inner {
                settings: PipelineSettings::from(&config),
                selector: BackendSelector::new(probes, config.probe_timeout()),
                config,
                loader,
                secondary_factory,
                progress: ProgressSender::new(),
                state: Mutex::new(EngineState::Uninitialized),
                pending_init: Mutex::new(None),
                runtime: tokio::sync::Mutex::new(Runtime::default()),
                models_loaded: AtomicBool::new(false),
            }),
        }
    }
}

/// OCR engine handle
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// An engine using ONNX Runtime probes and sessions and the default
    /// secondary engine
    pub fn new(config: EngineConfig) -> Self {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Progress of model loading and processing. Receivers may be dropped at
    /// any time.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress.subscribe()
    }

    /// Select a backend and load models, or start the secondary engine.
    ///
    /// Concurrent calls share one in-flight initialization. Calling again
    /// once ready returns the current status without doing any work.
    pub async fn initialize(&self) -> Result<InitStatus, OcrError> {
        let init = {
            let mut pending = lock(&self.inner.pending_init);

            match self.inner.state() {
                EngineState::Disposed => return Err(OcrError::EngineDisposed),
                state if state.is_ready() => return Ok(status_of(state)),
                _ => {}
            }

            match pending.as_ref() {
                Some(init) => init.clone(),
                None => {
                    self.inner.apply(EngineEvent::InitStarted)?;
                    let inner = Arc::clone(&self.inner);
                    let init = async move { inner.run_initialization().await }
                        .boxed()
                        .shared();
                    *pending = Some(init.clone());
                    init
                }
            }
        };

        init.await
    }

    /// Load the primary model set now instead of on first use.
    ///
    /// Progress is published on [`Engine::subscribe_progress`]. If loading
    /// fails the engine switches to the secondary engine.
    pub async fn load_models(&self) -> Result<(), OcrError> {
        self.ensure_initialized().await?;
        let mut runtime = self.inner.runtime.lock().await;

        match self.inner.state() {
            EngineState::Disposed => Err(OcrError::EngineDisposed),
            EngineState::ReadyFallback => {
                self.inner
                    .progress
                    .emit("Secondary engine active; no models to load", 100);
                Ok(())
            }
            EngineState::ReadyPrimary(_) => match self.inner.models(&mut runtime).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "Model loading failed, switching to secondary engine");
                    self.inner.switch_to_secondary(&mut runtime).await.map(|_| ())
                }
                Err(e) => Err(e),
            },
            state => Err(OcrError::Internal(format!(
                "engine not ready after initialization: {:?}",
                state
            ))),
        }
    }

    /// Detect and recognize all text in `image`.
    pub async fn process_image(
        &self,
        image: DynamicImage,
        options: ProcessOptions,
    ) -> Result<OcrResult, OcrError> {
        self.process(Operation::Image, image, options).await
    }

    /// Recognize the text inside `bounding_box` only.
    ///
    /// The box is clamped to the image; a box with no area inside the image
    /// is rejected as [`OcrError::InvalidRequest`] whichever engine is active.
    pub async fn process_region(
        &self,
        image: DynamicImage,
        bounding_box: BoundingBox,
        options: ProcessOptions,
    ) -> Result<OcrResult, OcrError> {
        if !(bounding_box.width > 0.0 && bounding_box.height > 0.0) {
            return Err(OcrError::InvalidRequest(format!(
                "Region must have a positive size, got {}x{}",
                bounding_box.width, bounding_box.height
            )));
        }
        let (width, height) = image.dimensions();
        if bounding_box.clamp_to(width, height).area() <= 0.0 {
            return Err(OcrError::InvalidRequest(format!(
                "Region {:?} lies outside the {}x{} image",
                bounding_box, width, height
            )));
        }
        self.process(Operation::Region(bounding_box), image, options)
            .await
    }

    pub fn engine_info(&self) -> Result<EngineInfo, OcrError> {
        let state = self.inner.state();
        if state == EngineState::Disposed {
            return Err(OcrError::EngineDisposed);
        }

        Ok(EngineInfo {
            initialized: state.is_ready(),
            backend: state.backend(),
            using_fallback: state.using_fallback(),
            models_loaded: self.inner.models_loaded.load(Ordering::SeqCst),
            state,
        })
    }

    /// Release every model session and the secondary engine. Every later
    /// call fails with [`OcrError::EngineDisposed`].
    pub async fn dispose(&self) -> Result<(), OcrError> {
        {
            let mut pending = lock(&self.inner.pending_init);
            self.inner.apply(EngineEvent::Dispose)?;
            *pending = None;
        }

        // Waits for an in-flight operation to finish with the resources
        let mut runtime = self.inner.runtime.lock().await;
        self.inner.release(&mut runtime);

        tracing::info!("Engine disposed");
        Ok(())
    }

    async fn ensure_initialized(&self) -> Result<(), OcrError> {
        match self.inner.state() {
            EngineState::Disposed => Err(OcrError::EngineDisposed),
            state if state.is_ready() => Ok(()),
            _ => self.initialize().await.map(|_| ()),
        }
    }

    async fn process(
        &self,
        operation: Operation,
        image: DynamicImage,
        options: ProcessOptions,
    ) -> Result<OcrResult, OcrError> {
        self.ensure_initialized().await?;

        let image = Arc::new(image);
        let mut runtime = self.inner.runtime.lock().await;

        match self.inner.state() {
            EngineState::Disposed => Err(OcrError::EngineDisposed),
            EngineState::ReadyFallback => {
                let secondary = self.inner.secondary(&mut runtime).await?;
                self.inner.run_secondary(secondary, operation, image).await
            }
            EngineState::ReadyPrimary(backend) => {
                let primary = self
                    .inner
                    .run_primary(&mut runtime, backend, operation, Arc::clone(&image), options)
                    .await;

                match primary {
                    Ok(result) => Ok(result),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(
                            backend = %backend,
                            error = %e,
                            "Primary pipeline failed, retrying on secondary engine"
                        );
                        let secondary = self.inner.switch_to_secondary(&mut runtime).await?;
                        let mut result =
                            self.inner.run_secondary(secondary, operation, image).await?;
                        result.warnings.insert(
                            0,
                            format!("Primary pipeline failed and was replaced by the secondary engine: {}", e),
                        );
                        Ok(result)
                    }
                    Err(e) => Err(e),
                }
            }
            state => Err(OcrError::Internal(format!(
                "engine not ready after initialization: {:?}",
                state
            ))),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status_of(state: EngineState) -> InitStatus {
    InitStatus {
        initialized: state.is_ready(),
        backend: state.backend().unwrap_or(Backend::Secondary),
        using_fallback: state.using_fallback(),
    }
}

fn join_error(e: tokio::task::JoinError) -> OcrError {
    OcrError::InferenceError(format!("Blocking task failed: {}", e))
}

impl Inner {
    fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    fn apply(&self, event: EngineEvent) -> Result<EngineState, OcrError> {
        let mut state = lock(&self.state);
        let next = transition(*state, event)?;
        if next != *state {
            tracing::info!(from = ?*state, to = ?next, "Engine state changed");
        }
        *state = next;
        Ok(next)
    }

    fn release(&self, runtime: &mut Runtime) {
        runtime.models = None;
        runtime.secondary = None;
        runtime.session_options = None;
        self.models_loaded.store(false, Ordering::SeqCst);
    }

    async fn run_initialization(self: Arc<Self>) -> Result<InitStatus, OcrError> {
        let started = self.start().await;

        let event = match started {
            Ok(Started::Primary { options, models }) => {
                let backend = options.backend;
                let mut runtime = self.runtime.lock().await;
                runtime.session_options = Some(options);
                if let Some(models) = models {
                    runtime.models = Some(Arc::new(Mutex::new(models)));
                    self.models_loaded.store(true, Ordering::SeqCst);
                }
                Ok(EngineEvent::PrimaryReady(backend))
            }
            Ok(Started::Fallback(secondary)) => {
                self.runtime.lock().await.secondary = Some(secondary);
                Ok(EngineEvent::FallbackReady)
            }
            Err(e) => Err(e),
        };

        let applied = {
            let mut pending = lock(&self.pending_init);
            *pending = None;
            match &event {
                Ok(event) => self.apply(*event),
                Err(_) => self.apply(EngineEvent::InitFailed),
            }
        };

        match (event, applied) {
            (Ok(_), Ok(state)) => {
                let status = status_of(state);
                tracing::info!(
                    backend = %status.backend,
                    using_fallback = status.using_fallback,
                    "Engine initialized"
                );
                self.progress.emit("Engine ready", 100);
                Ok(status)
            }
            (Ok(_), Err(e)) => {
                // Disposed while initializing
                let mut runtime = self.runtime.lock().await;
                self.release(&mut runtime);
                Err(e)
            }
            (Err(e), _) => Err(e),
        }
    }

    async fn start(&self) -> Result<Started, OcrError> {
        if self.config.force_fallback {
            tracing::info!("Fallback forced by configuration, starting secondary engine");
            return self.start_fallback().await;
        }

        let Some(sources) = self.config.models.clone() else {
            tracing::info!("No primary models configured, starting secondary engine");
            return self.start_fallback().await;
        };

        self.progress.emit("Probing inference backends", 5);
        let options = match self.selector.select().await {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    candidates = ?self.selector.candidates(),
                    "No usable backend, starting secondary engine"
                );
                return self.start_fallback().await;
            }
        };

        if !self.config.preload_models {
            return Ok(Started::Primary {
                options,
                models: None,
            });
        }

        match self.load_model_set(sources, options.clone()).await {
            Ok(models) => Ok(Started::Primary {
                options,
                models: Some(models),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Model loading failed, starting secondary engine");
                self.start_fallback().await
            }
        }
    }

    async fn start_fallback(&self) -> Result<Started, OcrError> {
        self.create_secondary()
            .await
            .map(Started::Fallback)
            .map_err(|e| match e {
                OcrError::InitializationError(_) => e,
                other => OcrError::InitializationError(other.to_string()),
            })
    }

    async fn create_secondary(&self) -> Result<Arc<dyn SecondaryEngine>, OcrError> {
        self.progress.emit("Starting secondary OCR engine", 50);
        let factory = Arc::clone(&self.secondary_factory);
        let secondary = tokio::task::spawn_blocking(move || factory.create())
            .await
            .map_err(|e| OcrError::InitializationError(format!("Secondary engine startup failed: {}", e)))??;
        tracing::info!(engine = secondary.name(), "Secondary engine ready");
        Ok(secondary)
    }

    async fn load_model_set(
        &self,
        sources: ModelSources,
        options: SessionOptions,
    ) -> Result<ModelSet, OcrError> {
        let loader = Arc::clone(&self.loader);
        let progress = self.progress.clone();
        tokio::task::spawn_blocking(move || {
            ModelSet::load(&sources, loader.as_ref(), &options, &progress)
        })
        .await
        .map_err(|e| OcrError::ModelLoadError(format!("Model loading task failed: {}", e)))?
    }

    /// The loaded model set, loading it first if needed
    async fn models(&self, runtime: &mut Runtime) -> Result<Arc<Mutex<ModelSet>>, OcrError> {
        if let Some(models) = &runtime.models {
            return Ok(Arc::clone(models));
        }

        let sources = self
            .config
            .models
            .clone()
            .ok_or_else(|| OcrError::ModelLoadError("No primary models configured".to_string()))?;
        let options = runtime
            .session_options
            .clone()
            .ok_or_else(|| OcrError::Internal("No backend selected".to_string()))?;

        let models = Arc::new(Mutex::new(self.load_model_set(sources, options).await?));
        runtime.models = Some(Arc::clone(&models));
        self.models_loaded.store(true, Ordering::SeqCst);
        Ok(models)
    }

    /// The secondary engine, starting it first if needed
    async fn secondary(&self, runtime: &mut Runtime) -> Result<Arc<dyn SecondaryEngine>, OcrError> {
        if let Some(secondary) = &runtime.secondary {
            return Ok(Arc::clone(secondary));
        }
        let secondary = self.create_secondary().await?;
        runtime.secondary = Some(Arc::clone(&secondary));
        Ok(secondary)
    }

    /// Move to `ReadyFallback` for good and drop the primary models.
    async fn switch_to_secondary(
        &self,
        runtime: &mut Runtime,
    ) -> Result<Arc<dyn SecondaryEngine>, OcrError> {
        let secondary = self.secondary(runtime).await?;
        self.apply(EngineEvent::FallbackReady)?;
        runtime.models = None;
        self.models_loaded.store(false, Ordering::SeqCst);
        Ok(secondary)
    }

    async fn run_primary(
        &self,
        runtime: &mut Runtime,
        backend: Backend,
        operation: Operation,
        image: Arc<DynamicImage>,
        options: ProcessOptions,
    ) -> Result<OcrResult, OcrError> {
        let models = self.models(runtime).await?;
        let settings = self.settings;
        let progress = self.progress.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&*models);
            match operation {
                Operation::Image => pipeline::run_image(
                    &mut guard,
                    &image,
                    &settings,
                    &options,
                    backend,
                    &progress,
                ),
                Operation::Region(bbox) => {
                    pipeline::run_region(&mut guard, &image, bbox, &settings, &options, backend)
                }
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn run_secondary(
        &self,
        secondary: Arc<dyn SecondaryEngine>,
        operation: Operation,
        image: Arc<DynamicImage>,
    ) -> Result<OcrResult, OcrError> {
        let progress = self.progress.clone();

        tokio::task::spawn_blocking(move || match operation {
            Operation::Image => pipeline::run_secondary_image(secondary.as_ref(), &image, &progress),
            Operation::Region(bbox) => {
                pipeline::run_secondary_region(secondary.as_ref(), &image, bbox)
            }
        })
        .await
        .map_err(join_error)?
    }
}
