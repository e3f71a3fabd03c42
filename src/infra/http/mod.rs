mod middleware;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use stampo_engine::EngineError;

use crate::application::{
    error::ErrorReport,
    fill::{FillError, FillRequest, FillService},
};

pub use middleware::{RequestContext, log_responses, set_request_context};

/// Stable machine-readable error categories carried in failure bodies.
pub mod codes {
    pub const INVALID_TEMPLATE: &str = "invalid_template";
    pub const TEMPLATE_SYNTAX: &str = "template_syntax_error";
    pub const RENDER: &str = "render_error";
    pub const RENDER_TIMEOUT: &str = "render_timeout";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Clone)]
pub struct HttpState {
    pub fill: Arc<FillService>,
}

pub fn build_router(state: HttpState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/fill", post(fill))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(axum::middleware::from_fn(log_responses))
        .layer(axum::middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn health() -> &'static str {
    "stampo document engine is running"
}

#[derive(Debug, Serialize)]
struct FillResponse {
    #[serde(rename = "docxBase64")]
    docx_base64: String,
}

async fn fill(State(state): State<HttpState>, Json(request): Json<FillRequest>) -> Response {
    match state.fill.fill(request).await {
        Ok(docx_base64) => Json(FillResponse { docx_base64 }).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: FillError) -> Response {
    let (status, body) = match &error {
        FillError::MissingInput => (
            StatusCode::BAD_REQUEST,
            json!({ "error": "Missing templateBase64 or data" }),
        ),
        FillError::Unauthorized => (
            StatusCode::FORBIDDEN,
            json!({ "error": "Invalid API key" }),
        ),
        FillError::InvalidTemplate(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": codes::INVALID_TEMPLATE, "details": message }),
        ),
        FillError::Engine(engine) => {
            let code = match engine {
                EngineError::Syntax(_) => codes::TEMPLATE_SYNTAX,
                _ => codes::RENDER,
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": code, "details": engine.joined_details() }),
            )
        }
        FillError::Timeout(timeout) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "error": codes::RENDER_TIMEOUT,
                "details": format!("rendering did not finish within {}s", timeout.as_secs()),
            }),
        ),
        FillError::Internal(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": codes::INTERNAL, "details": message }),
        ),
    };

    let mut response = (status, Json(body)).into_response();
    ErrorReport::from_error("infra::http::fill", status, &error).attach(&mut response);
    response
}
