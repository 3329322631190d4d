use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::api::error::{ApiFailure, ErrorKind};
use crate::api::response::outcome_response;
use crate::api::server::AppState;
use crate::generators::GenerationContext;
use crate::validation::Args;

/// A parsed generation request. `method` is `None` when absent or not a string.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub method: Option<String>,
    pub args: Args,
}

pub async fn describe_handler(State(state): State<AppState>) -> Json<Value> {
    Json(state.dispatcher.describe())
}

pub async fn generate_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_generate_request(&body) {
        Ok(request) => request,
        Err(failure) => return failure.into_response(),
    };
    let ctx = GenerationContext {
        request_id: Uuid::new_v4().to_string(),
        cancel: state.shutdown.clone(),
    };
    debug!(
        request_id = %ctx.request_id,
        method = request.method.as_deref().unwrap_or_default(),
        arg_count = request.args.len(),
        "generation request received"
    );
    match state
        .dispatcher
        .generate(request.method.as_deref(), &request.args, &ctx)
        .await
    {
        Ok(outcome) => outcome_response(outcome),
        Err(err) => ApiFailure::from(err).into_response(),
    }
}

pub async fn method_not_allowed_handler() -> Response {
    ApiFailure::method_not_allowed().into_response()
}

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "method_count": state.dispatcher.registry().len(),
        })),
    )
}

pub fn parse_generate_request(body: &[u8]) -> Result<GenerateRequest, ApiFailure> {
    let parsed: Value =
        serde_json::from_slice(body).map_err(|e| ApiFailure::invalid_body(e.to_string()))?;
    let Value::Object(mut root) = parsed else {
        return Err(shape_error("Request body must be a JSON object"));
    };
    let method = match root.remove("method") {
        Some(Value::String(method)) => Some(method),
        _ => None,
    };
    let args = match root.remove("args") {
        None | Some(Value::Null) => Args::new(),
        Some(Value::Object(args)) => args,
        Some(_) => return Err(shape_error("Field 'args' must be an object")),
    };
    Ok(GenerateRequest { method, args })
}

fn shape_error(message: &str) -> ApiFailure {
    ApiFailure::new(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        "invalid_request",
        message,
    )
}
