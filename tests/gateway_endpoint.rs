use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use imagegen_gateway::api::server::{build_router, default_dispatcher, AppState};
use imagegen_gateway::config::GatewaySettings;

const TEST_KEY: &str = "test-gateway-key";

fn app() -> Router {
    let dispatcher = default_dispatcher(&GatewaySettings::default()).expect("dispatcher");
    let (_tx, rx) = watch::channel(false);
    build_router(AppState::new(Arc::new(dispatcher), Some(TEST_KEY), false, rx))
}

async fn send(app: Router, method: Method, uri: &str, auth: Option<&str>, body: Body) -> Response {
    let is_post = method == Method::POST;
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    if is_post {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    app.oneshot(builder.body(body).expect("request"))
        .await
        .expect("router responds")
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn generate(app: Router, body: Value) -> Response {
    send(
        app,
        Method::POST,
        "/api",
        Some(TEST_KEY),
        Body::from(body.to_string()),
    )
    .await
}

#[tokio::test]
async fn describe_requires_bearer_token() {
    let response = send(app(), Method::GET, "/api", None, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("Unauthorized"));
    assert_eq!(body["error_kind"], json!("auth"));

    let response = send(app(), Method::GET, "/api", Some("wrong"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(app(), Method::POST, "/", None, Body::from("{}")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn describe_lists_every_method_with_consistent_fields() {
    let app = app();
    let first = json_body(send(app.clone(), Method::GET, "/api", Some(TEST_KEY), Body::empty()).await).await;
    let second = json_body(send(app, Method::GET, "/", Some(TEST_KEY), Body::empty()).await).await;

    assert_eq!(first["status"], json!("operational"));
    assert!(first["last_check_at"].as_str().is_some());
    assert_eq!(first["methods"], second["methods"]);

    let methods = first["methods"].as_object().expect("methods object");
    assert_eq!(methods.len(), 9);
    assert!(!methods.contains_key("advanced_query"));
    for (key, descriptor) in methods {
        let credits = descriptor["credits"].as_f64().expect("numeric credits");
        assert!(credits >= 0.0, "{key} has negative credits");
        let fields = descriptor["fields"].as_object().expect("fields object");
        for (name, field) in fields {
            if field["required"] == json!(true) {
                assert!(field.get("default").is_none(), "{key}.{name} is required with a default");
            }
        }
    }
}

#[tokio::test]
async fn missing_method_lists_available_methods() {
    let response = generate(app(), json!({"args": {}})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("Missing required field: method"));
    let available = body["available_methods"].as_array().expect("available methods");
    assert!(available.contains(&json!("gradientCircle")));
}

#[tokio::test]
async fn unknown_method_is_rejected() {
    let response = generate(app(), json!({"method": "paintByNumbers"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("Unknown generation method: paintByNumbers"));
    assert_eq!(body["available_methods"].as_array().map(Vec::len), Some(9));
}

#[tokio::test]
async fn missing_required_arguments_are_named() {
    let response = generate(app(), json!({"method": "fluxImageEdit", "args": {"prompt": "sky"}})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["method"], json!("fluxImageEdit"));
    assert_eq!(body["missing_fields"], json!(["image_url"]));
    assert_eq!(body["error_code"], json!("missing_fields"));
}

#[tokio::test]
async fn replicate_rejects_blank_model() {
    for model in ["", "  "] {
        let response = generate(
            app(),
            json!({"method": "replicate", "args": {"model": model, "prompt": "a fox"}}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "model {model:?}");
        let body = json_body(response).await;
        assert_eq!(body["error"], json!("Field 'model' must not be empty"));
        assert_eq!(body["error_code"], json!("empty_required_field"));
        assert_eq!(body["fields"], json!(["model"]));
        assert_eq!(body["method"], json!("replicate"));
    }
}

#[tokio::test]
async fn centered_text_returns_png_with_headers() {
    let response = generate(
        app(),
        json!({"method": "centeredTextOnWhite", "args": {"text": "Hi", "color": "#ff0000"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-image-width"], "1024");
    assert_eq!(headers["x-image-height"], "1024");
    assert_eq!(headers["x-image-color"], "#ff0000");
    assert_eq!(headers["x-credits"], "0.25");

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    assert_eq!(headers[header::CONTENT_LENGTH], bytes.len().to_string().as_str());
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn invalid_color_is_a_generation_failure() {
    let response = generate(
        app(),
        json!({"method": "centeredTextOnWhite", "args": {"text": "Hi", "color": "red"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("Failed to generate image"));
    assert_eq!(body["message"], json!("Invalid hex color format: red"));
    assert_eq!(body["method"], json!("centeredTextOnWhite"));
    assert_eq!(body["error_code"], json!("invalid_argument"));
}

#[tokio::test]
async fn generator_argument_errors_share_the_failure_shape() {
    let cases = [
        (
            json!({"method": "fluxImageKlein", "args": {"prompt": "a fox", "resolution": "8k"}}),
            "Unknown resolution: 8k",
        ),
        (
            json!({"method": "uploadImage", "args": {"image_url": "file:///etc/passwd"}}),
            "image_url must be http(s): file:///etc/passwd",
        ),
    ];
    for (request, message) in cases {
        let response = generate(app(), request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{message}");
        let body = json_body(response).await;
        assert_eq!(body["error"], json!("Failed to generate image"));
        assert_eq!(body["message"], json!(message));
        assert_eq!(body["error_code"], json!("invalid_argument"));
    }
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let response = send(
        app(),
        Method::POST,
        "/api",
        Some(TEST_KEY),
        Body::from("{\"method\":"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("Invalid JSON in request body"));
    assert_eq!(body["error_code"], json!("invalid_json"));
}

#[tokio::test]
async fn other_verbs_are_not_allowed() {
    for method in [Method::PUT, Method::DELETE, Method::PATCH] {
        let response = send(app(), method.clone(), "/api", None, Body::empty()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        let body = json_body(response).await;
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["error_code"], json!("method_not_allowed"));
    }
}

#[tokio::test]
async fn health_skips_auth() {
    let response = send(app(), Method::GET, "/health", None, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["service"], json!("imagegen-gateway"));
    assert_eq!(body["method_count"], json!(9));
}

#[tokio::test]
async fn flux_without_key_fails_before_any_request() {
    let response = generate(app(), json!({"method": "fluxImage", "args": {"prompt": "a lighthouse"}})).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("Failed to generate image"));
    assert_eq!(body["message"], json!("BFL_API_KEY is not set"));
    assert_eq!(body["error_kind"], json!("infra"));
}

#[tokio::test]
async fn advanced_query_returns_json() {
    let response = generate(app(), json!({"method": "advanced_query", "args": {"items": []}})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body, json!({"supported": true, "cost": 3}));
}

#[tokio::test]
async fn advanced_generate_routes_to_flux_pro() {
    let response = generate(
        app(),
        json!({"method": "advanced_generate", "args": {"items": [{"source": "web"}]}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("Failed to generate image"));
    assert_eq!(body["message"], json!("BFL_API_KEY is not set"));
    assert_eq!(body["method"], json!("advanced_generate"));
    assert_eq!(body["error_code"], json!("missing_credential"));
}

#[tokio::test]
async fn dev_bypass_skips_auth() {
    let dispatcher = default_dispatcher(&GatewaySettings::default()).expect("dispatcher");
    let (_tx, rx) = watch::channel(false);
    let app = build_router(AppState::new(Arc::new(dispatcher), None, true, rx));
    let response = send(app, Method::GET, "/api", None, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
}
