//! Integration tests for the ambient endpoints and router middleware:
//! liveness text, key diagnostics, rate limiting and CORS.

use axum::body::Body;
use http::Request;
use serde_json::Value;
use tower::{Service, ServiceExt};

use llm_relay::config::{ApiKey, Config, KeySource, RelayMode};
use llm_relay::proxy::{create_router, AppState, REQUEST_ID_HEADER};

fn app(config: Config) -> axum::Router {
    create_router(AppState::new(config, reqwest::Client::new()).unwrap())
}

async fn read_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_root_reports_mode() {
    let response = app(Config::default()).oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(
        read_text(response).await,
        "OpenRouter / Gemini proxy is running (non-streaming & normalized)."
    );

    let mut config = Config::default();
    config.server.mode = RelayMode::Streaming;
    let response = app(config).oneshot(get("/")).await.unwrap();
    assert_eq!(
        read_text(response).await,
        "OpenRouter / Gemini proxy is running (streaming)."
    );
}

#[tokio::test]
async fn test_env_diagnostics_never_leak_keys() {
    let secret = "sk-or-v1-0123456789abcdef";
    let mut config = Config::default();
    config.providers.openrouter.api_keys = vec![ApiKey::from(secret), ApiKey::from("sk-or-v1-zzzz")];
    config.providers.openrouter.key_source = KeySource::Environment("API_KEYS".to_string());

    let response = app(config).oneshot(get("/test-env")).await.unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let text = read_text(response).await;
    assert!(!text.contains(secret));
    assert!(!text.contains("0123456789"));

    let body: Value = serde_json::from_str(&text).unwrap();
    let openrouter = &body["providers"]["openrouter"];
    assert_eq!(openrouter["configured"], true);
    assert_eq!(openrouter["count"], 2);
    assert_eq!(openrouter["source"], "environment (API_KEYS)");
    assert_eq!(openrouter["first_key"]["length"], secret.len());
    assert_eq!(openrouter["first_key"]["preview"], "sk-o...");

    let google = &body["providers"]["google"];
    assert_eq!(google["configured"], false);
    assert_eq!(google["count"], 0);
    assert!(google["first_key"].is_null());
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_requests() {
    let mut config = Config::default();
    config.server.rate_limit_per_minute = 2;
    let mut app = app(config).into_service::<Body>();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = app.ready().await.unwrap().call(get("/")).await.unwrap();
        statuses.push(response.status());
        if response.status() == http::StatusCode::TOO_MANY_REQUESTS {
            let body: Value = serde_json::from_str(&read_text(response).await).unwrap();
            assert_eq!(body["success"], false);
        }
    }

    assert_eq!(
        statuses,
        vec![
            http::StatusCode::OK,
            http::StatusCode::OK,
            http::StatusCode::TOO_MANY_REQUESTS
        ]
    );
}

#[tokio::test]
async fn test_rate_limit_disabled_with_zero() {
    let mut config = Config::default();
    config.server.rate_limit_per_minute = 0;
    let mut app = app(config).into_service::<Body>();

    for _ in 0..100 {
        let response = app.ready().await.unwrap().call(get("/")).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
    }
}

#[tokio::test]
async fn test_cors_allow_list() {
    let mut config = Config::default();
    config.server.rate_limit_per_minute = 0;
    config.server.allowed_origins = vec!["https://app.example.com".to_string()];
    let app = app(config);

    let allowed = Request::get("/")
        .header("origin", "https://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(allowed).await.unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example.com"
    );

    let denied = Request::get("/")
        .header("origin", "https://evil.example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(denied).await.unwrap();
    assert!(!response
        .headers()
        .contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_cors_any_origin_by_default() {
    let request = Request::get("/")
        .header("origin", "https://anywhere.example")
        .body(Body::empty())
        .unwrap();
    let response = app(Config::default()).oneshot(request).await.unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let mut config = Config::default();
    config.server.rate_limit_per_minute = 0;
    config.providers.openrouter.api_keys = vec![ApiKey::from("or-key-1")];

    let padding = "x".repeat(2 * 1024 * 1024);
    let body = format!(
        r#"{{"messages":[{{"role":"user","content":"{}"}}]}}"#,
        padding
    );
    let request = Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
}
