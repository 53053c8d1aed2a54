//! HTTP request layer over the capture coordinator

use crate::{CaptureCoordinator, CaptureError, EnrichmentStatus, HealthChecker, HealthLevel};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Uploaded screenshots arrive base64-encoded inside JSON
const UPLOAD_BODY_LIMIT: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: CaptureCoordinator,
    pub health: Arc<HealthChecker>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(coordinator: CaptureCoordinator, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            coordinator,
            health: Arc::new(HealthChecker::default()),
            prometheus,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/capture", post(capture))
        .route("/ocr", get(ocr))
        .route(
            "/ocr-upload",
            post(ocr_upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
        // Browser extensions call from arbitrary origins
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, addr: &str) -> Result<(), CaptureError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Page capture service listening on {}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Error body returned as `{ "error": ..., "message": ... }`
pub struct ApiError(CaptureError);

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CaptureError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            CaptureError::PoolClosed | CaptureError::PoolExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CaptureError::NavigationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match status {
            StatusCode::BAD_REQUEST => "Invalid request",
            StatusCode::SERVICE_UNAVAILABLE => "Service unavailable",
            StatusCode::GATEWAY_TIMEOUT => "Capture timed out",
            _ => "Failed to capture screenshot",
        };
        let body = Json(json!({ "error": error, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /capture",
            "GET /ocr?url=",
            "POST /ocr-upload",
            "GET /health",
            "GET /metrics",
        ],
    }))
}

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub screenshot: String,
}

async fn capture(
    State(state): State<AppState>,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let url = request
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| CaptureError::InvalidUrl("URL is required".to_string()))?;

    debug!("Capture requested for {}", url);
    let artifact = state.coordinator.capture(&url).await?;

    Ok(Json(CaptureResponse {
        screenshot: artifact.to_data_url(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct OcrQuery {
    pub url: Option<String>,
}

async fn ocr(
    State(state): State<AppState>,
    Query(query): Query<OcrQuery>,
) -> Result<Response, ApiError> {
    let url = query
        .url
        .ok_or_else(|| CaptureError::InvalidUrl("URL is required".to_string()))?;

    let response = match state.coordinator.get_enrichment(&url) {
        EnrichmentStatus::Ready(enrichment) if !enrichment.text.trim().is_empty() => {
            Json(json!({
                "url": url,
                "status": "success",
                "ocrText": enrichment.text,
                "ocrTimestamp": enrichment.enriched_at,
            }))
            .into_response()
        }
        // An empty result reads as not ready yet
        EnrichmentStatus::Pending | EnrichmentStatus::Ready(_) => Json(json!({
            "url": url,
            "status": "processing",
            "ocrText": "",
            "message": "OCR is still processing",
        }))
        .into_response(),
        EnrichmentStatus::Absent => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "url": url,
                "status": "absent",
                "message": "No OCR result for this URL",
            })),
        )
            .into_response(),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct OcrUploadRequest {
    /// Raw base64 or a `data:image/...;base64,` URL
    pub image: Option<String>,
}

async fn ocr_upload(
    State(state): State<AppState>,
    Json(request): Json<OcrUploadRequest>,
) -> Response {
    let Some(image) = request.image.filter(|image| !image.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing image parameter",
                "message": "Please provide an image in base64 format",
            })),
        )
            .into_response();
    };

    let data = match decode_image(&image) {
        Ok(data) => data,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "error": format!("Invalid base64 image: {e}") })),
            )
                .into_response()
        }
    };

    debug!("Extracting text from uploaded image ({} bytes)", data.len());
    match state.coordinator.extract_uploaded(data).await {
        Ok(text) if !text.trim().is_empty() => {
            let character_count = text.chars().count();
            info!("Extracted {} characters from uploaded image", character_count);
            Json(json!({
                "status": "success",
                "ocrText": text,
                "characterCount": character_count,
            }))
            .into_response()
        }
        Ok(_) => Json(json!({
            "status": "error",
            "error": "Failed to extract OCR text from uploaded image",
        }))
        .into_response(),
        Err(e) => {
            warn!("Text extraction for uploaded image failed: {}", e);
            Json(json!({ "status": "error", "error": e.to_string() })).into_response()
        }
    }
}

/// Decode the payload of a `data:` URL, or the whole string when there is no
/// prefix
fn decode_image(image: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = image.split_once(',').map_or(image, |(_, data)| data);
    STANDARD.decode(payload.trim())
}

async fn health(State(state): State<AppState>) -> Response {
    let report = state.health.check(&state.coordinator);
    let status = match report.status {
        HealthLevel::Critical => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report)).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not enabled").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, FakeBackend};
    use crate::{CaptureArtifact, MockTextExtractor, NoopExtractor, TextExtractor};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        state_with_extractor(Arc::new(NoopExtractor)).await
    }

    async fn state_with_extractor(extractor: Arc<dyn TextExtractor>) -> AppState {
        let coordinator =
            CaptureCoordinator::new(test_config(), Arc::new(FakeBackend::new()), extractor);
        coordinator.start().await.unwrap();
        AppState::new(coordinator, None)
    }

    fn sample_capture(url: &str) -> Arc<CaptureArtifact> {
        Arc::new(CaptureArtifact {
            url: url.to_string(),
            data: vec![1, 2, 3],
            title: None,
            captured_at: chrono::Utc::now(),
            render_time: std::time::Duration::from_millis(5),
            worker_id: 0,
            overflow: false,
        })
    }

    fn get_ocr(url: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/ocr?url={url}"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_capture(body: &str) -> Request<Body> {
        post_json("/capture", body)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_capture_returns_data_url() {
        let app = router(test_state().await);

        let response = app
            .oneshot(post_capture(r#"{"url": "https://example.com/"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["screenshot"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_capture_without_url_is_bad_request() {
        let app = router(test_state().await);

        let response = app.oneshot(post_capture("{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Invalid request");
    }

    #[tokio::test]
    async fn test_capture_with_invalid_url_is_bad_request() {
        let app = router(test_state().await);

        let response = app
            .oneshot(post_capture(r#"{"url": "not a url"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_capture_after_shutdown_is_unavailable() {
        let state = test_state().await;
        state.coordinator.shutdown().await;
        let app = router(state);

        let response = app
            .oneshot(post_capture(r#"{"url": "https://example.com/"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |err| ApiError(err).status();
        assert_eq!(
            status(CaptureError::NavigationTimeout(std::time::Duration::from_secs(90))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(CaptureError::PoolExhausted { limit: 4 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(CaptureError::CaptureFailed("net::ERR_NAME_NOT_RESOLVED".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_ocr_reports_ready_text() {
        let state = test_state().await;
        let url = "https://example.com/";
        state.coordinator.cache().put(url, sample_capture(url));
        state
            .coordinator
            .cache()
            .attach_enrichment(url, "Example Domain".to_string());
        let app = router(state);

        let response = app.oneshot(get_ocr(url)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["ocrText"], "Example Domain");
    }

    #[tokio::test]
    async fn test_ocr_with_empty_text_is_processing() {
        let state = test_state().await;
        let url = "https://blank.test/";
        state.coordinator.cache().put(url, sample_capture(url));
        state
            .coordinator
            .cache()
            .attach_enrichment(url, "  \n".to_string());
        let app = router(state);

        let response = app.oneshot(get_ocr(url)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "processing");
        assert_eq!(body["ocrText"], "");
    }

    #[tokio::test]
    async fn test_ocr_while_pass_is_running() {
        let state = test_state().await;
        let url = "https://busy.test/";
        let generation = state.coordinator.cache().put(url, sample_capture(url));
        assert!(state.coordinator.cache().begin_enrichment(url, generation));
        let app = router(state);

        let response = app.oneshot(get_ocr(url)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "processing");
        assert_eq!(body["ocrText"], "");
    }

    #[tokio::test]
    async fn test_ocr_upload_without_image_is_bad_request() {
        let app = router(test_state().await);

        let response = app.oneshot(post_json("/ocr-upload", "{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Missing image parameter");
    }

    #[tokio::test]
    async fn test_ocr_upload_extracts_text() {
        let mut extractor = MockTextExtractor::new();
        extractor
            .expect_extract()
            .withf(|artifact| artifact.data == [0x89, b'P', b'N', b'G'])
            .times(1)
            .returning(|_| Ok("Sign in".to_string()));
        let state = state_with_extractor(Arc::new(extractor)).await;
        let coordinator = state.coordinator.clone();
        let app = router(state);

        let response = app
            .oneshot(post_json(
                "/ocr-upload",
                r#"{"image": "data:image/png;base64,iVBORw=="}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["ocrText"], "Sign in");
        assert_eq!(body["characterCount"], 7);

        // Nothing went through the pool or the cache
        assert_eq!(coordinator.queue_stats().running, 0);
        assert_eq!(coordinator.pool_stats().in_use, 0);
        assert_eq!(coordinator.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_ocr_upload_reports_extractor_error() {
        let mut extractor = MockTextExtractor::new();
        extractor
            .expect_extract()
            .returning(|_| Err(CaptureError::EnrichmentFailed("tesseract missing".to_string())));
        let app = router(state_with_extractor(Arc::new(extractor)).await);

        let response = app
            .oneshot(post_json("/ocr-upload", r#"{"image": "iVBORw=="}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["error"].as_str().unwrap().contains("tesseract missing"));
    }

    #[tokio::test]
    async fn test_ocr_upload_with_bad_base64() {
        let app = router(test_state().await);

        let response = app
            .oneshot(post_json("/ocr-upload", r#"{"image": "not base64!"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["status"], "error");
    }

    #[tokio::test]
    async fn test_ocr_for_unknown_url() {
        let app = router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ocr?url=https://unknown.test/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["status"], "absent");
    }

    #[tokio::test]
    async fn test_health_reports_pool() {
        let app = router(test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["pool"]["total"], 2);
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let app = router(test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
