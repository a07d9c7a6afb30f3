//! OpenRouter adapter: OpenAI-compatible pass-through with bearer auth.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde_json::Value;

use super::normalize::{join_part_texts, output_string};
use super::{join_url, Locator, Provider, ProviderAdapter, UpstreamRequest};
use crate::config::{ApiKey, RelayMode};
use crate::error::{Error, Result};
use crate::proxy::types::{ChatRequest, PROVIDER_FIELDS};

/// Forwards the caller's body almost verbatim to `<base>/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    base_url: Url,
}

impl OpenRouterAdapter {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// Upstream body: the inbound body minus the provider selector, with
    /// `stream` removed in buffered mode and forced on in streaming mode.
    fn upstream_body(request: &ChatRequest, mode: RelayMode) -> Value {
        let mut body = request.body.clone();
        for field in PROVIDER_FIELDS {
            if body.get(field).is_some_and(Value::is_string) {
                body.remove(field);
            }
        }
        match mode {
            RelayMode::Buffered => {
                body.remove("stream");
            }
            RelayMode::Streaming => {
                body.insert("stream".to_string(), Value::Bool(true));
            }
        }
        Value::Object(body)
    }
}

impl ProviderAdapter for OpenRouterAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenRouter
    }

    fn resolve_model(&self, request: &ChatRequest) -> String {
        request.model.clone().unwrap_or_default()
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        credential: &ApiKey,
        mode: RelayMode,
    ) -> Result<UpstreamRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credential.expose_secret()))
            .map_err(|_| {
                Error::Internal("OpenRouter API key contains invalid header characters".into())
            })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        Ok(UpstreamRequest {
            url: join_url(&self.base_url, &["chat", "completions"])?,
            headers,
            body: Self::upstream_body(request, mode),
        })
    }

    fn locators(&self) -> &'static [Locator] {
        LOCATORS
    }
}

const LOCATORS: &[Locator] = &[
    ("choices[0].message", choice_message_string),
    ("choices[0].message.content", choice_message_content),
    ("choices[0].message.content.parts", choice_content_parts),
    ("choices[0].text", choice_text),
    ("output", output_string),
    ("outputs", outputs_array),
];

fn first_choice(value: &Value) -> Option<&Value> {
    value.get("choices")?.as_array()?.first()
}

fn choice_message_string(value: &Value) -> Option<String> {
    first_choice(value)?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn choice_message_content(value: &Value) -> Option<String> {
    first_choice(value)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Content given as `{ parts: [...] }` or directly as a part array.
fn choice_content_parts(value: &Value) -> Option<String> {
    let content = first_choice(value)?.get("message")?.get("content")?;
    let parts = content.get("parts").unwrap_or(content).as_array()?;
    Some(join_part_texts(parts))
}

/// Legacy completion shape; only consulted when the choice has no message.
fn choice_text(value: &Value) -> Option<String> {
    let choice = first_choice(value)?;
    if choice.get("message").is_some_and(|m| !m.is_null()) {
        return None;
    }
    choice.get("text")?.as_str().map(str::to_string)
}

fn outputs_array(value: &Value) -> Option<String> {
    let outputs = value.get("outputs")?.as_array()?;
    let texts: Vec<&str> = outputs
        .iter()
        .map(|o| {
            o.get("text")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .or_else(|| o.get("content").and_then(Value::as_str))
                .unwrap_or("")
        })
        .collect();
    Some(texts.join("\n"))
}
