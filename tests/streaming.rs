//! Integration tests for the streaming relay mode.

use std::time::Duration;

use axum::body::Body;
use http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_relay::config::{ApiKey, Config, RelayMode};
use llm_relay::proxy::{create_router, AppState};

fn streaming_app(upstream: &MockServer) -> axum::Router {
    let mut config = Config::default();
    config.server.mode = RelayMode::Streaming;
    config.server.rate_limit_per_minute = 0;
    config.providers.openrouter.base_url = upstream.uri();
    config.providers.openrouter.api_keys = vec![ApiKey::from("or-key-1")];
    config.providers.google.base_url = upstream.uri();
    config.providers.google.api_keys = vec![ApiKey::from("AIza-test-1")];
    create_router(AppState::new(config, reqwest::Client::new()).unwrap())
}

fn chat_request(body: Value) -> Request<Body> {
    Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_openrouter_events_are_relayed_in_order() {
    let upstream = MockServer::start().await;
    let sse = concat!(
        ": OPENROUTER PROCESSING\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&upstream)
        .await;

    let response = streaming_app(&upstream)
        .oneshot(chat_request(json!({
            "model": "openai/gpt-4o-mini",
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let body = read_text(response).await;
    assert_eq!(
        body,
        concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
    );
}

#[tokio::test]
async fn test_two_fragments_in_one_chunk_become_two_events() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("{\"a\":1}\n{\"b\":2}\n", "application/x-ndjson"),
        )
        .mount(&upstream)
        .await;

    let response = streaming_app(&upstream)
        .oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .await
        .unwrap();

    let body = read_text(response).await;
    assert_eq!(
        body,
        "data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_gemini_uses_stream_endpoint() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(query_param("key", "AIza-test-1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\r\n\r\n",
            "text/event-stream",
        ))
        .expect(1)
        .mount(&upstream)
        .await;

    let response = streaming_app(&upstream)
        .oneshot(chat_request(json!({
            "provider": "google",
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .await
        .unwrap();

    let body = read_text(response).await;
    assert_eq!(
        body,
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\n\ndata: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_upstream_error_becomes_error_event() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "No auth credentials found"},
        })))
        .mount(&upstream)
        .await;

    let response = streaming_app(&upstream)
        .oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .await
        .unwrap();

    // The event stream is already open when the upstream answers.
    assert_eq!(response.status(), http::StatusCode::OK);

    let body = read_text(response).await;
    let events: Vec<&str> = body
        .split("\n\n")
        .filter(|e| !e.is_empty())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], "data: [DONE]");

    let error: Value = serde_json::from_str(events[0].strip_prefix("data: ").unwrap()).unwrap();
    assert_eq!(error["error"]["status"], 401);
    assert_eq!(
        error["error"]["body"]["error"]["message"],
        "No auth credentials found"
    );
}

#[tokio::test]
async fn test_timeout_becomes_error_event() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {}\n\n", "text/event-stream")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&upstream)
        .await;

    let mut config = Config::default();
    config.server.mode = RelayMode::Streaming;
    config.server.rate_limit_per_minute = 0;
    config.server.timeout_ms = 100;
    config.providers.openrouter.base_url = upstream.uri();
    config.providers.openrouter.api_keys = vec![ApiKey::from("or-key-1")];
    let app = create_router(AppState::new(config, reqwest::Client::new()).unwrap());

    let response = app
        .oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .await
        .unwrap();

    let body = read_text(response).await;
    assert!(body.starts_with("data: {\"error\":"));
    assert!(body.contains("timed out"));
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn test_validation_errors_stay_json_in_streaming_mode() {
    let upstream = MockServer::start().await;

    let response = streaming_app(&upstream)
        .oneshot(chat_request(json!({"messages": "nope"})))
        .await
        .unwrap();

    assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: Value = serde_json::from_str(&read_text(response).await).unwrap();
    assert_eq!(body["error"], "messages must be an array");
}

#[tokio::test]
async fn test_connection_failure_event_omits_key() {
    let secret = "AIzaSECRETKEY123456";
    let mut config = Config::default();
    config.server.mode = RelayMode::Streaming;
    config.server.rate_limit_per_minute = 0;
    config.providers.google.base_url = "http://127.0.0.1:9".to_string();
    config.providers.google.api_keys = vec![ApiKey::from(secret)];
    let app = create_router(AppState::new(config, reqwest::Client::new()).unwrap());

    let response = app
        .oneshot(chat_request(json!({
            "provider": "google",
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .await
        .unwrap();

    let body = read_text(response).await;
    assert!(body.starts_with("data: {\"error\":\"Upstream request failed"));
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert!(!body.contains(secret));
}
