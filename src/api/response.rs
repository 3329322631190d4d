use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::dispatch::{DispatchOutcome, ImageReply};

pub const DEFAULT_IMAGE_COLOR: &str = "#000000";

pub static X_IMAGE_COLOR: HeaderName = HeaderName::from_static("x-image-color");
pub static X_IMAGE_WIDTH: HeaderName = HeaderName::from_static("x-image-width");
pub static X_IMAGE_HEIGHT: HeaderName = HeaderName::from_static("x-image-height");
pub static X_CREDITS: HeaderName = HeaderName::from_static("x-credits");

/// Formats a credit weight the way clients expect: `3`, `0.25`, `1.5`.
pub fn format_credits(credits: f64) -> String {
    if credits.fract() == 0.0 && credits.abs() < 1e15 {
        format!("{}", credits as i64)
    } else {
        format!("{credits}")
    }
}

pub fn image_response(reply: ImageReply) -> Response {
    let ImageReply {
        result, credits, ..
    } = reply;
    let color = result
        .color
        .as_deref()
        .and_then(|c| HeaderValue::from_str(c).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_IMAGE_COLOR));
    let length = result.buffer.len();

    let mut response = Response::new(Body::from(result.buffer));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(X_IMAGE_COLOR.clone(), color);
    headers.insert(X_IMAGE_WIDTH.clone(), HeaderValue::from(result.width));
    headers.insert(X_IMAGE_HEIGHT.clone(), HeaderValue::from(result.height));
    if let Ok(value) = HeaderValue::from_str(format_credits(credits).as_str()) {
        headers.insert(X_CREDITS.clone(), value);
    }
    response
}

pub fn outcome_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Image(reply) => image_response(reply),
        DispatchOutcome::Json(body) => json_response(body),
    }
}

pub fn json_response(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::GenerationResult;

    #[test]
    fn credits_render_without_trailing_zeroes() {
        assert_eq!(format_credits(3.0), "3");
        assert_eq!(format_credits(0.25), "0.25");
        assert_eq!(format_credits(1.5), "1.5");
        assert_eq!(format_credits(0.0), "0");
    }

    #[test]
    fn image_headers_follow_contract() {
        let response = image_response(ImageReply {
            method: String::from("gradientCircle"),
            result: GenerationResult::new(vec![1, 2, 3, 4, 5], 1024, 768),
            credits: 0.25,
        });
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-image-color"], DEFAULT_IMAGE_COLOR);
        assert_eq!(headers["x-image-width"], "1024");
        assert_eq!(headers["x-image-height"], "768");
        assert_eq!(headers["x-credits"], "0.25");
    }
}
