//! Message-passing front end for running the engine in its own task
//!
//! Requests are `{type, id, data}` envelopes; every request id resolves to
//! exactly one terminal `SUCCESS` or `ERROR` response, preceded by zero or
//! more `PROGRESS` responses. An id may not be reused while it is among the
//! worker's last [`RECENT_ID_CAPACITY`] request ids.

use crate::config::ProcessOptions;
use crate::engine::Engine;
use crate::error::{ErrorResponse, OcrError};
use crate::geometry::BoundingBox;
use crate::progress::ProgressEvent;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 32;
/// Number of past request ids remembered for duplicate detection
pub const RECENT_ID_CAPACITY: usize = 4096;

/// Bounded set of the most recently used request ids, oldest evicted first
#[derive(Debug)]
struct RecentIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`; false if it is already among the recent ids.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Initialize,
    LoadModels,
    ProcessImage,
    ProcessRegion,
    GetEngineInfo,
    Dispose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: RequestType,
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Success { id: String, data: Value },
    Error { id: String, error: ErrorResponse },
    Progress { id: String, data: ProgressEvent },
}

impl Response {
    pub fn id(&self) -> &str {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } | Self::Progress { id, .. } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Payload of `PROCESS_IMAGE`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessImageData {
    /// Base64-encoded image file (PNG, JPEG, ...)
    pub image: String,
    #[serde(default)]
    pub options: ProcessOptions,
}

/// Payload of `PROCESS_REGION`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRegionData {
    pub image: String,
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub options: ProcessOptions,
}

/// Handle to a running worker task
pub struct OcrWorker {
    requests: mpsc::Sender<Request>,
    task: JoinHandle<()>,
}

impl OcrWorker {
    /// Start serving `engine`; responses arrive on the returned receiver.
    pub fn spawn(engine: Engine) -> (Self, mpsc::Receiver<Response>) {
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let task = tokio::spawn(serve(engine, request_rx, response_tx));

        (
            Self {
                requests: request_tx,
                task,
            },
            response_rx,
        )
    }

    pub async fn send(&self, request: Request) -> Result<(), OcrError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| OcrError::Internal("OCR worker has stopped".to_string()))
    }

    /// Parse a JSON request envelope and send it
    pub async fn send_json(&self, json: &str) -> Result<(), OcrError> {
        let request: Request = serde_json::from_str(json)
            .map_err(|e| OcrError::InvalidRequest(format!("Malformed request: {}", e)))?;
        self.send(request).await
    }

    /// Stop accepting requests and wait for queued ones to finish
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "OCR worker task failed");
        }
    }
}

async fn serve(
    engine: Engine,
    mut requests: mpsc::Receiver<Request>,
    responses: mpsc::Sender<Response>,
) {
    let mut seen = RecentIds::new(RECENT_ID_CAPACITY);
    let mut progress = engine.subscribe_progress();

    while let Some(request) = requests.recv().await {
        let id = request.id.clone();
        tracing::debug!(id = %id, kind = ?request.kind, "Worker request");

        if !seen.insert(&id) {
            let error = OcrError::InvalidRequest(format!("Request id '{}' was already used", id));
            if responses.send(error_response(id, &error)).await.is_err() {
                break;
            }
            continue;
        }

        // Anything queued belongs to an earlier request
        drain(&mut progress);

        let handled = handle(&engine, request.kind, request.data);
        tokio::pin!(handled);

        let outcome = loop {
            tokio::select! {
                outcome = &mut handled => break outcome,
                event = progress.recv() => match event {
                    Ok(event) => {
                        let _ = responses.send(Response::Progress { id: id.clone(), data: event }).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Progress receiver lagged");
                    }
                    Err(RecvError::Closed) => break (&mut handled).await,
                },
            }
        };

        for event in drain(&mut progress) {
            let _ = responses.send(Response::Progress { id: id.clone(), data: event }).await;
        }

        let response = match outcome {
            Ok(data) => Response::Success { id, data },
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Worker request failed");
                error_response(id, &e)
            }
        };

        if responses.send(response).await.is_err() {
            tracing::debug!("Response receiver dropped, stopping worker");
            break;
        }
    }
}

/// Take every buffered progress event
fn drain(progress: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        match progress.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
        }
    }
}

fn error_response(id: String, error: &OcrError) -> Response {
    Response::Error {
        id,
        error: ErrorResponse::from(error),
    }
}

fn decode_image(encoded: &str) -> Result<DynamicImage, OcrError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| OcrError::InvalidRequest(format!("Image is not valid base64: {}", e)))?;
    image::load_from_memory(&bytes)
        .map_err(|e| OcrError::InvalidRequest(format!("Failed to decode image: {}", e)))
}

fn parse<T: for<'de> Deserialize<'de>>(data: Value) -> Result<T, OcrError> {
    serde_json::from_value(data)
        .map_err(|e| OcrError::InvalidRequest(format!("Invalid request data: {}", e)))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, OcrError> {
    serde_json::to_value(value).map_err(|e| OcrError::Internal(e.to_string()))
}

async fn handle(engine: &Engine, kind: RequestType, data: Value) -> Result<Value, OcrError> {
    match kind {
        RequestType::Initialize => to_value(&engine.initialize().await?),
        RequestType::LoadModels => {
            engine.load_models().await?;
            Ok(Value::Null)
        }
        RequestType::ProcessImage => {
            let data: ProcessImageData = parse(data)?;
            let image = decode_image(&data.image)?;
            to_value(&engine.process_image(image, data.options).await?)
        }
        RequestType::ProcessRegion => {
            let data: ProcessRegionData = parse(data)?;
            let image = decode_image(&data.image)?;
            to_value(
                &engine
                    .process_region(image, data.bounding_box, data.options)
                    .await?,
            )
        }
        RequestType::GetEngineInfo => to_value(&engine.engine_info()?),
        RequestType::Dispose => {
            engine.dispose().await?;
            Ok(Value::Null)
        }
    }
}
