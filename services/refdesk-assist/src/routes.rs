//! HTTP API routes.

use crate::error::AssistError;
use crate::gateway::ImageInput;
use crate::orchestrator::DocumentSource;
use crate::service::AssistService;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use refdesk_common::logging::generate_trace_id;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::Instrument;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AssistService>,
}

impl AppState {
    pub fn new(service: Arc<AssistService>) -> Self {
        Self { service }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.service.config().server.max_body_mb * 1024 * 1024;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Sessions
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        // Analysis
        .route("/api/sessions/:id/analyze", post(analyze_image))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

/// Run each request inside a span carrying a fresh trace id.
async fn trace_request(request: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        trace_id = %generate_trace_id(),
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let response = next.run(request).await;
        tracing::debug!(status = response.status().as_u16(), "Request finished");
        response
    }
    .instrument(span)
    .await
}

// ============ Health Check ============

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "refdesk-assist",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.service.store().len().await,
    }))
}

// ============ Sessions ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    pdf_base64: Option<String>,
    pdf_path: Option<PathBuf>,
    filename: Option<String>,
    name: Option<String>,
}

impl CreateSessionRequest {
    fn into_source(self) -> Result<(DocumentSource, Option<String>), AssistError> {
        let source = match (self.pdf_base64, self.pdf_path) {
            (Some(encoded), None) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| {
                        AssistError::Validation(format!("pdfBase64 is not valid base64: {e}"))
                    })?;
                DocumentSource::Bytes {
                    filename: self.filename.unwrap_or_default(),
                    bytes,
                }
            }
            (None, Some(path)) => DocumentSource::Path(path),
            (Some(_), Some(_)) => {
                return Err(AssistError::Validation(
                    "provide either pdfBase64 or pdfPath, not both".into(),
                ))
            }
            (None, None) => {
                return Err(AssistError::Validation(
                    "one of pdfBase64 or pdfPath is required".into(),
                ))
            }
        };
        Ok((source, self.name))
    }
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AssistError> {
    let (source, name) = request.into_source()?;
    let session = state.service.create_session(source, name).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": session
        })),
    ))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.service.list_sessions().await;
    Json(serde_json::json!({
        "success": true,
        "data": {
            "sessions": sessions,
            "count": sessions.len()
        }
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AssistError> {
    let session = state.service.get_session(&id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": session
    })))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AssistError> {
    let report = state.service.delete_session(&id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": report
    })))
}

// ============ Analysis ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    image_base64: String,
    media_type: Option<String>,
    instruction: Option<String>,
}

async fn analyze_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, AssistError> {
    let mut image = ImageInput::png(request.image_base64);
    if let Some(media_type) = request.media_type.filter(|m| !m.trim().is_empty()) {
        image.media_type = media_type;
    }

    let result = state
        .service
        .analyze_image(&id, image, request.instruction)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": result
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::OpenAiGateway;
    use axum::body::Body;
    use axum::http::Request;
    use refdesk_common::Config;
    use std::time::Duration;
    use tower::ServiceExt;

    // Nothing listens on the discard port; these routes never reach the provider.
    fn test_app() -> Router {
        let gateway = OpenAiGateway::with_base_url(
            "sk-test",
            "http://127.0.0.1:9",
            Duration::from_secs(1),
        )
        .unwrap();
        let service = AssistService::new(Arc::new(gateway), Config::default());
        build_router(AppState::new(Arc::new(service)))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let response = test_app()
            .oneshot(Request::builder().uri("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_unknown_session_is_not_found() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/thread_missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_session_requires_a_source() {
        let response = test_app()
            .oneshot(post_json("/api/sessions", r#"{"name": "script"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_session_rejects_bad_base64() {
        let response = test_app()
            .oneshot(post_json("/api/sessions", r#"{"pdfBase64": "%%%"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_rejects_bad_image() {
        let response = test_app()
            .oneshot(post_json(
                "/api/sessions/thread_1/analyze",
                r#"{"imageBase64": "not base64!"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
