//! Outbound calls under a timeout.
//!
//! One attempt per request. A call that misses its deadline is dropped, which
//! aborts the in-flight connection.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::provider::UpstreamRequest;

/// Run `work`, failing with [`Error::Timeout`] once `timeout` elapses.
pub(crate) async fn with_deadline<T, F>(timeout: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Send `request`; the deadline covers the response headers only.
pub async fn timed_fetch(request: RequestBuilder, timeout: Duration) -> Result<Response> {
    with_deadline(timeout, async { Ok::<_, Error>(request.send().await?) }).await
}

fn upstream_post(client: &Client, upstream: &UpstreamRequest) -> RequestBuilder {
    client
        .post(upstream.url.clone())
        .headers(upstream.headers.clone())
        .json(&upstream.body)
}

/// POST a built upstream request, returning once the headers arrive.
///
/// Used by the streaming relay, where the body is open-ended.
pub async fn send_upstream(
    client: &Client,
    upstream: &UpstreamRequest,
    timeout: Duration,
) -> Result<Response> {
    timed_fetch(upstream_post(client, upstream), timeout).await
}

/// POST a built upstream request and read its whole body, all under one
/// deadline. An upstream that sends headers and then stalls still times out.
pub async fn fetch_payload(
    client: &Client,
    upstream: &UpstreamRequest,
    timeout: Duration,
) -> Result<(StatusCode, Value)> {
    let request = upstream_post(client, upstream);
    with_deadline(timeout, async {
        let response = request.send().await?;
        let status = response.status();
        Ok::<_, Error>((status, read_payload(response).await))
    })
    .await
}

/// Read an upstream body as JSON, falling back to `{ "raw": <text> }` when it
/// is not JSON and `{ "raw": null }` when it cannot be read at all.
pub async fn read_payload(response: Response) -> Value {
    match response.bytes().await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::json!({ "raw": String::from_utf8_lossy(&bytes) })
        }),
        Err(e) => {
            tracing::warn!(error = %e.without_url(), "Failed to read upstream body");
            serde_json::json!({ "raw": null })
        }
    }
}
