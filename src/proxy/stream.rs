//! Server-sent-event relay.
//!
//! Upstream bytes are split into lines and every meaningful line is re-emitted
//! as one `data:` event, in arrival order, followed by a `data: [DONE]`
//! sentinel. Lines split across network chunks are reassembled before they
//! are relayed.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};

use crate::error::Result;

/// Final event of every relayed stream.
pub const DONE_EVENT: &str = "data: [DONE]\n\n";

/// Longest partial line kept while waiting for its newline.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Frame one payload as an SSE `data:` event.
pub fn sse_event(payload: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", payload))
}

/// Frame an error as an SSE event carrying a JSON object.
pub fn error_event(error: serde_json::Value) -> Bytes {
    sse_event(&serde_json::json!({ "error": error }).to_string())
}

/// Payload to relay for one upstream line, if any.
///
/// A leading `data:` field name is removed so events are not framed twice.
/// Comments, other SSE fields and an upstream `[DONE]` are dropped.
pub fn relay_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.trim() == "[DONE]" || data.trim().is_empty() {
            return None;
        }
        return Some(data);
    }
    if ["event:", "id:", "retry:"].iter().any(|f| line.starts_with(f)) {
        return None;
    }
    Some(line)
}

/// Reassembles complete lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }

        // A runaway line is relayed as-is rather than buffered without bound.
        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                bytes = self.buffer.len(),
                "Upstream line exceeds buffer cap, relaying partial line"
            );
            lines.push(String::from_utf8_lossy(&self.buffer).into_owned());
            self.buffer.clear();
        }

        lines
    }

    /// Take whatever is left once the upstream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(rest)
    }
}

struct RelayState<S> {
    upstream: Pin<Box<S>>,
    lines: LineBuffer,
    pending: VecDeque<Bytes>,
    finished: bool,
}

impl<S> RelayState<S> {
    fn queue_lines(&mut self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            if let Some(payload) = relay_payload(&line) {
                self.pending.push_back(sse_event(payload));
            }
        }
    }

    fn finish(&mut self) {
        self.pending.push_back(Bytes::from_static(DONE_EVENT.as_bytes()));
        self.finished = true;
    }
}

/// Re-frame an upstream byte stream as SSE events.
///
/// An upstream error ends the relay with one error event and the sentinel.
pub fn relay_events<S, E>(upstream: S) -> impl Stream<Item = std::result::Result<Bytes, Infallible>>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    let state = RelayState {
        upstream: Box::pin(upstream),
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.lines.push(&chunk);
                    state.queue_lines(lines);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Error streaming from provider");
                    state
                        .pending
                        .push_back(error_event(serde_json::Value::String(e.to_string())));
                    state.finish();
                }
                None => {
                    let rest = state.lines.finish();
                    state.queue_lines(rest);
                    state.finish();
                }
            }
        }
    })
}

/// Events for a relay that ends before any upstream bytes: one error event
/// and the sentinel.
pub fn failed_relay(error: serde_json::Value) -> BoxStream<'static, std::result::Result<Bytes, Infallible>> {
    stream::iter([
        Ok(error_event(error)),
        Ok(Bytes::from_static(DONE_EVENT.as_bytes())),
    ])
    .boxed()
}

/// Relay a pending upstream call.
///
/// The returned stream can be handed to the client before `pending`
/// resolves, so the event stream is open while the upstream is still
/// connecting.
pub fn relay_upstream<F>(pending: F) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send
where
    F: Future<Output = Result<reqwest::Response>> + Send + 'static,
{
    stream::once(async move {
        match pending.await {
            Ok(response) if response.status().is_success() => {
                // Mid-stream errors carry the request URL, which may hold a key.
                relay_events(response.bytes_stream().map_err(reqwest::Error::without_url)).boxed()
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::error!(status = %status, body = %body, "Provider returned error");
                let body = serde_json::from_str(&body)
                    .unwrap_or(serde_json::Value::String(body));
                failed_relay(serde_json::json!({
                    "message": format!("Upstream returned {}", status),
                    "status": status.as_u16(),
                    "body": body,
                }))
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reach provider");
                failed_relay(serde_json::Value::String(e.to_string()))
            }
        }
    })
    .flatten()
}
