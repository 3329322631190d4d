use axum::extract::{Request, State};
use axum::http::{header, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ring::hmac;
use ring::rand::SystemRandom;
use tracing::warn;

use crate::api::error::ApiFailure;
use crate::api::server::AppState;

/// Guards GET/HEAD/POST on the gateway endpoint. Other verbs fall through to
/// the 405 handler.
pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.auth_dev_bypass {
        return next.run(request).await;
    }
    let requires_auth = matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::POST
    );
    if !requires_auth {
        return next.run(request).await;
    }

    let authorized = match (state.api_key.as_deref(), extract_bearer_token(&request)) {
        (Some(expected), Some(presented)) => token_matches(expected, presented.as_str()),
        (None, _) => {
            warn!("inbound API key is not configured; rejecting request");
            false
        }
        (Some(_), None) => false,
    };
    if !authorized {
        return ApiFailure::unauthorized().into_response();
    }
    next.run(request).await
}

/// Compares tokens by HMAC tag under a one-off key.
pub(crate) fn token_matches(expected: &str, presented: &str) -> bool {
    let Ok(key) = hmac::Key::generate(hmac::HMAC_SHA256, &SystemRandom::new()) else {
        warn!("failed to generate token comparison key; rejecting request");
        return false;
    };
    let tag = hmac::sign(&key, expected.as_bytes());
    hmac::verify(&key, presented.as_bytes(), tag.as_ref()).is_ok()
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    let header_value = request.headers().get(header::AUTHORIZATION)?;
    let value = header_value.to_str().ok()?.trim();
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next()?.trim();
    let token = parts.next()?.trim();
    if !scheme.eq_ignore_ascii_case("Bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request_with(auth: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(
            extract_bearer_token(&request_with(Some("Bearer abc"))).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_bearer_token(&request_with(Some("bearer  abc "))).as_deref(),
            Some("abc")
        );
        assert!(extract_bearer_token(&request_with(Some("Basic abc"))).is_none());
        assert!(extract_bearer_token(&request_with(Some("Bearer "))).is_none());
        assert!(extract_bearer_token(&request_with(None)).is_none());
    }

    #[test]
    fn token_comparison_is_exact() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secret2"));
        assert!(!token_matches("secret", "Secret"));
        assert!(!token_matches("secret", ""));
        assert!(!token_matches("", "secret"));
        assert!(token_matches("tok-\u{e9}", "tok-\u{e9}"));
    }
}
