//! HTTP request handlers.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::fetch::{fetch_payload, send_upstream, with_deadline};
use super::server::{AppState, RequestId};
use super::stream::relay_upstream;
use super::types::{ChatRequest, NormalizedResponse};
use crate::config::{KeySource, RelayMode};
use crate::error::{Error, Result};
use crate::provider::{join_url, CredentialPool, Provider, UpstreamRequest};

/// Static catalog served when the live listing is unavailable.
const FALLBACK_MODELS: &[(&str, &str)] = &[
    ("gemini-2.5-pro", "Gemini 2.5 Pro"),
    ("gemini-2.5-flash", "Gemini 2.5 Flash"),
    ("gemini-2.5-flash-lite", "Gemini 2.5 Flash-Lite"),
    ("gemini-2.0-flash", "Gemini 2.0 Flash"),
];

/// Handle POST /api/chat
///
/// Every failure is turned into a response here; nothing below this point
/// reaches the caller as anything other than a JSON error body.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let start = Instant::now();

    let result = match payload {
        Ok(Json(body)) => dispatch(&state, body).await,
        Err(rejection) => Err(Error::BadRequest(rejection.body_text())),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            tracing::info!(
                request_id = %request_id.0,
                status = response.status().as_u16(),
                latency_ms,
                "Chat request completed"
            );
            response
        }
        Err(e) => {
            match &e {
                Error::BadRequest(_) => {
                    tracing::warn!(request_id = %request_id.0, error = %e, "Rejected chat request")
                }
                _ => {
                    tracing::error!(request_id = %request_id.0, error = %e, latency_ms, "Proxy error")
                }
            }
            e.into_response()
        }
    }
}

/// Validate, pick adapter and credential, then relay in the configured mode.
async fn dispatch(state: &AppState, body: Value) -> Result<Response> {
    let request = ChatRequest::from_json(body)?;
    let provider = request.provider;
    let adapter = state.adapters.get(provider);
    let model = adapter.resolve_model(&request);
    let mode = state.config.server.mode;

    tracing::info!(
        provider = %provider,
        model = %model,
        messages = request.messages.len(),
        mode = mode.as_str(),
        "Received chat request"
    );

    let credential = state
        .credentials
        .next(provider)
        .ok_or(Error::NoCredential { provider })?;
    let upstream = adapter.build_request(&request, &credential, mode)?;

    match mode {
        RelayMode::Buffered => relay_buffered(state, provider, model, &upstream).await,
        RelayMode::Streaming => Ok(relay_streaming(state, upstream)),
    }
}

/// Issue the call, read the whole body and answer with a normalized response.
async fn relay_buffered(
    state: &AppState,
    provider: Provider,
    model: String,
    upstream: &UpstreamRequest,
) -> Result<Response> {
    let (status, raw) =
        fetch_payload(&state.http_client, upstream, state.config.server.timeout()).await?;

    if !status.is_success() {
        tracing::warn!(
            status = %status,
            provider = %provider,
            "Provider returned error"
        );
    }

    let content = state.adapters.extract_content(provider, &raw);
    let success = status.is_success();
    let http_status = if success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    let normalized = NormalizedResponse::new(success, provider, model, content, raw);
    Ok((http_status, Json(normalized)).into_response())
}

/// Open the event stream right away and relay the upstream into it.
fn relay_streaming(state: &AppState, upstream: UpstreamRequest) -> Response {
    let client = state.http_client.clone();
    let timeout = state.config.server.timeout();
    let pending = async move { send_upstream(&client, &upstream, timeout).await };

    let mut response = Response::new(Body::from_stream(relay_upstream(pending)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Query parameters for GET /api/models; `company` is the legacy name.
#[derive(Debug, Default, Deserialize)]
pub struct ModelsQuery {
    pub provider: Option<String>,
    pub company: Option<String>,
}

impl ModelsQuery {
    /// Requested provider, `provider` winning over `company`.
    pub fn provider(&self) -> Provider {
        self.provider
            .as_deref()
            .or(self.company.as_deref())
            .map(Provider::from_name)
            .unwrap_or_default()
    }
}

/// Handle GET /api/models
///
/// Never fails: an unreadable query or a failed live fetch both answer with
/// the fallback catalog.
pub async fn list_models(
    State(state): State<AppState>,
    query: std::result::Result<Query<ModelsQuery>, QueryRejection>,
) -> Json<Value> {
    let provider = match query {
        Ok(Query(query)) => Some(query.provider()),
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "Unreadable model listing query");
            None
        }
    };

    if provider == Some(Provider::OpenRouter) {
        match fetch_openrouter_models(&state).await {
            Ok(models) => {
                return Json(serde_json::json!({
                    "success": true,
                    "provider": "openrouter",
                    "models": models,
                }))
            }
            Err(e) => tracing::warn!(error = %e, "OpenRouter model fetch failed"),
        }
    }

    let models: Vec<Value> = FALLBACK_MODELS
        .iter()
        .map(|(id, name)| serde_json::json!({ "id": id, "name": name }))
        .collect();

    Json(serde_json::json!({
        "success": true,
        "provider": "fallback",
        "models": models,
    }))
}

/// Live OpenRouter catalog; any failure is reported to the caller as `Err`.
async fn fetch_openrouter_models(state: &AppState) -> Result<Value> {
    let base = reqwest::Url::parse(&state.config.providers.openrouter.base_url)
        .map_err(|e| Error::Internal(e.to_string()))?;
    let url = join_url(&base, &["models"])?;

    let request = state.http_client.get(url);
    let payload: Value = with_deadline(state.config.server.models_timeout(), async {
        Ok::<_, Error>(request.send().await?.json().await?)
    })
    .await?;

    match payload.get("data") {
        Some(models @ Value::Array(_)) => Ok(models.clone()),
        _ => Err(Error::Internal(
            "model listing has no 'data' array".to_string(),
        )),
    }
}

/// Handle GET /
pub async fn root(State(state): State<AppState>) -> String {
    let mode = match state.config.server.mode {
        RelayMode::Buffered => "non-streaming & normalized",
        RelayMode::Streaming => "streaming",
    };
    format!("OpenRouter / Gemini proxy is running ({}).", mode)
}

/// Handle GET /test-env - key presence and shape, never the key itself
pub async fn test_env(State(state): State<AppState>) -> Json<Value> {
    let providers: serde_json::Map<String, Value> = Provider::ALL
        .iter()
        .map(|&p| {
            (
                p.as_str().to_string(),
                key_diagnostics(
                    state.credentials.pool(p),
                    &state.config.providers.get(p).key_source,
                ),
            )
        })
        .collect();

    Json(serde_json::json!({
        "success": true,
        "providers": providers,
    }))
}

fn key_diagnostics(pool: &CredentialPool, source: &KeySource) -> Value {
    serde_json::json!({
        "configured": !pool.is_empty(),
        "count": pool.len(),
        "source": source.to_string(),
        "first_key": pool.first().map(|k| key_shape(k.expose_secret())),
    })
}

/// Length plus a short prefix; short keys are not previewed at all.
fn key_shape(secret: &str) -> Value {
    let length = secret.chars().count();
    let preview = if length > 8 {
        format!("{}...", secret.chars().take(4).collect::<String>())
    } else {
        "***".to_string()
    };
    serde_json::json!({ "length": length, "preview": preview })
}
