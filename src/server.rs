use crate::config::{Config, ProcessOptions, ServerConfig};
use crate::engine::{with_timeout, Engine, EngineInfo};
use crate::engines::DefaultSecondaryFactory;
use crate::error::OcrError;
use crate::geometry::BoundingBox;
use crate::result::OcrResult;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use image::DynamicImage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub config: Arc<ServerConfig>,
}

/// OCR response
#[derive(Debug, Serialize)]
pub struct OcrResponse {
    /// Recognized text, one region per line in confidence order
    pub text: String,
    pub confidence: f32,
    #[serde(flatten)]
    pub result: OcrResult,
}

impl From<OcrResult> for OcrResponse {
    fn from(result: OcrResult) -> Self {
        Self {
            text: result.text(),
            confidence: result.overall_confidence,
            result,
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub engine: Option<EngineInfo>,
    pub secondary_engines: Vec<&'static str>,
    pub supported_formats: Vec<String>,
    pub max_file_size_bytes: usize,
}

/// Image types the `image` crate is built to decode here
fn supported_formats() -> Vec<String> {
    [
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/bmp",
        "image/webp",
        "image/tiff",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size;

    Router::new()
        .route("/ocr", post(handle_ocr))
        .route("/ocr/region", post(handle_ocr_region))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(max_file_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let engine = Engine::new(config.engine);

    // Initialization failures are retried on the first request
    match engine.initialize().await {
        Ok(status) => tracing::info!(
            backend = %status.backend,
            using_fallback = status.using_fallback,
            "OCR engine ready"
        ),
        Err(e) => tracing::warn!(error = %e, "OCR engine failed to initialize at startup"),
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        engine,
        config: Arc::new(config.server),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// A parsed multipart upload: the file plus every text field
struct Upload {
    data: Bytes,
    fields: HashMap<String, String>,
}

impl Upload {
    fn image(&self) -> Result<DynamicImage, OcrError> {
        image::load_from_memory(&self.data)
            .map_err(|e| OcrError::InvalidRequest(format!("Failed to decode image: {}", e)))
    }

    fn number(&self, name: &str) -> Result<f32, OcrError> {
        let raw = self
            .fields
            .get(name)
            .ok_or_else(|| OcrError::InvalidRequest(format!("Missing field '{}'", name)))?;
        raw.trim()
            .parse()
            .map_err(|_| OcrError::InvalidRequest(format!("Field '{}' is not a number: {}", name, raw)))
    }

    /// Optional `options` field holding [`ProcessOptions`] as JSON
    fn options(&self) -> Result<ProcessOptions, OcrError> {
        match self.fields.get("options") {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| OcrError::InvalidRequest(format!("Invalid options: {}", e))),
            None => Ok(ProcessOptions::default()),
        }
    }
}

async fn read_upload(mut multipart: Multipart, max_file_size: usize) -> Result<Upload, OcrError> {
    let mut file_data: Option<Bytes> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OcrError::InvalidRequest(format!("Failed to parse multipart: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            if let Some(mime) = field.content_type() {
                if !mime.starts_with("image/") {
                    tracing::warn!("Received file with content type: {}", mime);
                }
            }
            file_data = Some(field.bytes().await.map_err(|e| {
                OcrError::InvalidRequest(format!("Failed to read file data: {}", e))
            })?);
        } else {
            let value = field.text().await.map_err(|e| {
                OcrError::InvalidRequest(format!("Invalid field '{}': {}", name, e))
            })?;
            fields.insert(name, value);
        }
    }

    let data = file_data.ok_or(OcrError::MissingFile)?;

    if data.len() > max_file_size {
        return Err(OcrError::ImageTooLarge {
            size: data.len(),
            max: max_file_size,
        });
    }

    Ok(Upload { data, fields })
}

/// Handle whole-image OCR requests
async fn handle_ocr(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<OcrResponse>, OcrError> {
    let upload = read_upload(multipart, state.config.max_file_size).await?;
    let image = upload.image()?;
    let options = upload.options()?;

    let result = with_timeout(
        state.config.request_timeout,
        state.engine.process_image(image, options),
    )
    .await?;

    tracing::info!(
        "OCR completed in {}ms on {}, confidence: {:.2}, regions: {}",
        result.processing_time_ms,
        result.engine_used,
        result.overall_confidence,
        result.regions.len()
    );

    Ok(Json(result.into()))
}

/// Handle single-region re-OCR requests
async fn handle_ocr_region(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<OcrResponse>, OcrError> {
    let upload = read_upload(multipart, state.config.max_file_size).await?;
    let bounding_box = BoundingBox::new(
        upload.number("x")?,
        upload.number("y")?,
        upload.number("width")?,
        upload.number("height")?,
    );
    let image = upload.image()?;
    let options = upload.options()?;

    let result = with_timeout(
        state.config.request_timeout,
        state.engine.process_region(image, bounding_box, options),
    )
    .await?;

    tracing::info!(
        "Region OCR completed in {}ms on {}, confidence: {:.2}",
        result.processing_time_ms,
        result.engine_used,
        result.overall_confidence
    );

    Ok(Json(result.into()))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: state.engine.engine_info().ok(),
        secondary_engines: DefaultSecondaryFactory::available(),
        supported_formats: supported_formats(),
        max_file_size_bytes: state.config.max_file_size,
    })
}
