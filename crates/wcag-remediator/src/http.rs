/// JSON-over-HTTP surface for browser front ends.
///
/// - `POST /analyzeUrl {"url"}`
/// - `POST /analyzeCode {"code"}`
/// - `POST /analyzeFile {"content"}`
/// - `GET /health`
///
/// Successful analyses return the `RemediationReport`; failures return
/// `{"error": "..."}`. Unreadable bodies keep the status axum assigns them (400, 415 or
/// 422), empty input is 400 and pipeline failures are 500.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::error::AppError;
use crate::pipeline::{RemediationPipeline, RemediationReport};

#[derive(Debug, Deserialize)]
pub struct AnalyzeUrlRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeFileRequest {
    pub content: String,
}

pub fn router(pipeline: Arc<RemediationPipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyzeUrl", post(analyze_url))
        .route("/analyzeCode", post(analyze_code))
        .route("/analyzeFile", post(analyze_file))
        .with_state(pipeline)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn analyze_url(
    State(pipeline): State<Arc<RemediationPipeline>>,
    payload: Result<Json<AnalyzeUrlRequest>, JsonRejection>,
) -> Result<Json<RemediationReport>, ApiError> {
    let Json(request) = payload?;
    let url = request.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }
    info!(url, "analyzeUrl requested");
    Ok(Json(pipeline.analyze(url).await?))
}

async fn analyze_code(
    State(pipeline): State<Arc<RemediationPipeline>>,
    payload: Result<Json<AnalyzeCodeRequest>, JsonRejection>,
) -> Result<Json<RemediationReport>, ApiError> {
    let Json(request) = payload?;
    analyze_markup(&pipeline, &request.code, "code").await
}

async fn analyze_file(
    State(pipeline): State<Arc<RemediationPipeline>>,
    payload: Result<Json<AnalyzeFileRequest>, JsonRejection>,
) -> Result<Json<RemediationReport>, ApiError> {
    let Json(request) = payload?;
    analyze_markup(&pipeline, &request.content, "content").await
}

async fn analyze_markup(
    pipeline: &RemediationPipeline,
    html: &str,
    field: &str,
) -> Result<Json<RemediationReport>, ApiError> {
    if html.trim().is_empty() {
        return Err(ApiError::bad_request(&format!("{field} must not be empty")));
    }
    info!(bytes = html.len(), "markup analysis requested");
    Ok(Json(pipeline.analyze_markup(html, None).await?))
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match err {
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
