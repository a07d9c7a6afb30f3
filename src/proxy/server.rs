//! HTTP server setup and configuration.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Json, Router,
};
use reqwest::Client;
use tower::{
    buffer::BufferLayer, limit::RateLimitLayer, load_shed::LoadShedLayer, ServiceBuilder,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{self, AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use super::handlers;
use crate::config::{Config, ServerConfig};
use crate::error::{Error, Result};
use crate::provider::{Adapters, Credentials, Provider};

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-relay-request-id";

/// Inbound JSON bodies larger than this are rejected.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Requests waiting for the rate limiter's worker.
const RATE_LIMIT_QUEUE: usize = 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: Client,
    pub credentials: Arc<Credentials>,
    pub adapters: Arc<Adapters>,
}

impl AppState {
    /// Build state from a validated config and a shared client.
    pub fn new(config: Config, http_client: Client) -> Result<Self> {
        let adapters = Adapters::from_config(&config.providers)?;
        let credentials = Credentials::from_config(&config.providers);

        Ok(Self {
            config: Arc::new(config),
            http_client,
            credentials: Arc::new(credentials),
            adapters: Arc::new(adapters),
        })
    }
}

/// Id assigned to every inbound request, available as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4();
    request.extensions_mut().insert(RequestId(id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn handle_overload(err: BoxError) -> Response {
    if err.is::<tower::load_shed::error::Overloaded>() {
        tracing::warn!("Rate limit exceeded, rejecting request");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "success": false,
                "error": "Too many requests, please try again later.",
            })),
        )
            .into_response()
    } else {
        Error::Internal(err.to_string()).into_response()
    }
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");
    Error::Internal(detail).into_response()
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(cors::Any);

    if server.allows_any_origin() {
        return layer.allow_origin(cors::Any);
    }

    let allowed: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Create the axum router with all endpoints.
///
/// The rate limiter spawns a worker task, so this must run inside a tokio
/// runtime when `rate_limit_per_minute` is non-zero.
pub fn create_router(state: AppState) -> Router {
    let server = state.config.server.clone();

    let routes = Router::new()
        .route("/", get(handlers::root))
        .route("/api/chat", post(handlers::chat))
        .route("/api/models", get(handlers::list_models))
        .route("/test-env", get(handlers::test_env))
        // State and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(assign_request_id))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(cors_layer(&server))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http());

    if server.rate_limit_per_minute == 0 {
        return routes;
    }

    // Router::layer wraps each route separately; the ceiling is process-wide,
    // so the whole router goes behind one limiter.
    let limited = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_overload))
        .layer(BufferLayer::<Request>::new(RATE_LIMIT_QUEUE))
        .layer(LoadShedLayer::new())
        .layer(RateLimitLayer::new(
            server.rate_limit_per_minute,
            Duration::from_secs(60),
        ))
        .service(routes);

    Router::new().fallback_service(limited)
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let http_client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let state = AppState::new(config, http_client)?;
    let server = &state.config.server;
    let listen_addr = server.listen.clone();

    for provider in Provider::ALL {
        tracing::info!(
            provider = %provider,
            keys = state.credentials.pool(provider).len(),
            source = %state.config.providers.get(provider).key_source,
            "Credential pool loaded"
        );
    }
    tracing::info!(
        mode = server.mode.as_str(),
        timeout_ms = server.timeout_ms,
        rate_limit_per_minute = server.rate_limit_per_minute,
        "Relay configured"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting llm-relay server");

    axum::serve(listener, app).await?;

    Ok(())
}
