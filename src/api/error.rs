use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::dispatch::DispatchError;
use crate::generators::GeneratorError;
use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    Provider,
    Infra,
}

/// A JSON error response: `{ok: false, error, error_kind, error_code, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub code: &'static str,
    pub error: String,
    pub extra: Map<String, Value>,
}

impl ApiFailure {
    pub fn new(
        status: StatusCode,
        kind: ErrorKind,
        code: &'static str,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status,
            kind,
            code,
            error: error.into(),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorKind::Auth, "unauthorized", "Unauthorized").with(
            "message",
            "Valid API key required. Use Authorization: Bearer <key>",
        )
    }

    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "invalid_json",
            "Invalid JSON in request body",
        )
        .with("message", message.into())
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::Validation,
            "method_not_allowed",
            "Method not allowed. Use GET for capabilities or POST for generation.",
        )
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert(String::from("ok"), Value::Bool(false));
        body.insert(String::from("error"), Value::String(self.error));
        for (key, value) in self.extra {
            body.insert(key, value);
        }
        body.insert(
            String::from("error_kind"),
            serde_json::to_value(self.kind).unwrap_or(Value::Null),
        );
        body.insert(String::from("error_code"), Value::from(self.code));
        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<DispatchError> for ApiFailure {
    fn from(error: DispatchError) -> Self {
        let message = error.to_string();
        match error {
            DispatchError::MissingMethod { available_methods } => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation,
                "missing_method",
                message,
            )
            .with("available_methods", available_methods),
            DispatchError::UnknownMethod {
                available_methods, ..
            } => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation,
                "unknown_method",
                message,
            )
            .with("available_methods", available_methods),
            DispatchError::Validation { method, source } => {
                let field_key = match &source {
                    ValidationError::MissingFields(_) => "missing_fields",
                    _ => "fields",
                };
                Self::new(
                    StatusCode::BAD_REQUEST,
                    ErrorKind::Validation,
                    source.code(),
                    message,
                )
                .with("method", method)
                .with(field_key, source.fields())
            }
            DispatchError::HandlerMissing(_) | DispatchError::HandlerMismatch { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                "handler_missing",
                message,
            ),
            DispatchError::Generation { method, source } => from_generator_error(method, source),
        }
    }
}

/// A generator that fails after validation is always a 500; the cause goes
/// in `message`.
fn from_generator_error(method: String, source: GeneratorError) -> ApiFailure {
    let message = source.to_string();
    let (kind, code) = match &source {
        GeneratorError::InvalidArgument(_) => (ErrorKind::Validation, "invalid_argument"),
        GeneratorError::MissingCredential(_) => (ErrorKind::Infra, "missing_credential"),
        GeneratorError::PayloadTooLarge { .. } => (ErrorKind::Provider, "payload_too_large"),
        GeneratorError::Image(_) => (ErrorKind::Infra, "image_processing_failed"),
        GeneratorError::Job(_) | GeneratorError::Transport { .. } | GeneratorError::Upstream(_) => {
            (ErrorKind::Provider, "upstream_failed")
        }
    };
    ApiFailure::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        kind,
        code,
        "Failed to generate image",
    )
    .with("method", method)
    .with("message", message)
}
