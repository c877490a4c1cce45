mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use ocr_inference_engine::server::{router, AppState};
use ocr_inference_engine::ServerConfig;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "ocr-test-boundary";

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct OcrResponse {
    text: String,
    confidence: f32,
    engine_used: String,
    regions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ErrorResponse {
    error: String,
    code: String,
}

fn app(models: &tempfile::TempDir) -> Router {
    let engine = engine(
        engine_config(models),
        MockLoader::default(),
        StubFactory::default(),
    );
    router(AppState {
        engine,
        config: Arc::new(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_file_size: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
        }),
    })
}

/// multipart/form-data body with an optional PNG `file` part and text fields
fn multipart(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(data) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"page.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn with_uri(mut request: Request<Body>, uri: &str) -> Request<Body> {
    *request.uri_mut() = uri.parse().unwrap();
    request
}

async fn json_body<T: for<'de> Deserialize<'de>>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let models = model_dir();
    let response = app(&models)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_info_reports_engine_state() {
    let models = model_dir();
    let response = app(&models)
        .oneshot(Request::get("/info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = json_body(response).await;
    assert_eq!(body["engine"]["initialized"], false);
    assert_eq!(body["max_file_size_bytes"], 1024 * 1024);
    assert!(body["supported_formats"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "image/png"));
}

#[tokio::test]
async fn test_ocr_endpoint() {
    let models = model_dir();
    let png = blank_png();
    let response = app(&models)
        .oneshot(with_uri(multipart(Some(&png), &[]), "/ocr"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: OcrResponse = json_body(response).await;
    assert_eq!(body.text, "hi");
    assert_eq!(body.engine_used, "vectorized");
    assert_eq!(body.regions.len(), 1);
}

#[tokio::test]
async fn test_region_endpoint() {
    let models = model_dir();
    let png = blank_png();
    let request = multipart(
        Some(&png),
        &[("x", "6"), ("y", "10"), ("width", "40"), ("height", "12")],
    );
    let response = app(&models)
        .oneshot(with_uri(request, "/ocr/region"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: OcrResponse = json_body(response).await;
    assert_eq!(body.text, "hi");
}

#[tokio::test]
async fn test_missing_file_is_bad_request() {
    let models = model_dir();
    let response = app(&models)
        .oneshot(with_uri(multipart(None, &[]), "/ocr"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.code, "MISSING_FILE");
}

#[tokio::test]
async fn test_region_requires_numeric_fields() {
    let models = model_dir();
    let png = blank_png();
    let request = multipart(Some(&png), &[("x", "left"), ("y", "0")]);
    let response = app(&models)
        .oneshot(with_uri(request, "/ocr/region"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.code, "INVALID_REQUEST");
}

#[tokio::test]
async fn test_undecodable_image_is_bad_request() {
    let models = model_dir();
    let response = app(&models)
        .oneshot(with_uri(multipart(Some(b"not an image"), &[]), "/ocr"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_region_outside_image_is_bad_request() {
    let models = model_dir();
    let png = blank_png();
    let request = multipart(
        Some(&png),
        &[("x", "200"), ("y", "200"), ("width", "10"), ("height", "10")],
    );
    let response = app(&models)
        .oneshot(with_uri(request, "/ocr/region"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.code, "INVALID_REQUEST");
}
