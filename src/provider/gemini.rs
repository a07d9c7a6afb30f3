//! Google Gemini adapter: message list to `contents`/`parts`, key in the query.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use super::normalize::{join_part_texts, output_string};
use super::{join_url, Locator, Provider, ProviderAdapter, UpstreamRequest};
use crate::config::{ApiKey, RelayMode};
use crate::error::{Error, Result};
use crate::proxy::types::ChatRequest;

/// Model used when neither the request nor the config names one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    base_url: Url,
    default_model: String,
}

#[derive(Debug, Serialize)]
struct GenerateContentBody {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

impl GeminiAdapter {
    pub fn new(base_url: Url, default_model: String) -> Self {
        Self {
            base_url,
            default_model,
        }
    }

    /// Map the generic message list; every role other than `user` becomes
    /// `assistant`.
    fn upstream_body(request: &ChatRequest) -> GenerateContentBody {
        GenerateContentBody {
            contents: request
                .messages
                .iter()
                .map(|m| Content {
                    role: if m.is_user() { "user" } else { "assistant" },
                    parts: vec![Part { text: m.text() }],
                })
                .collect(),
        }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn resolve_model(&self, request: &ChatRequest) -> String {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        model.strip_prefix("models/").unwrap_or(model).to_string()
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        credential: &ApiKey,
        mode: RelayMode,
    ) -> Result<UpstreamRequest> {
        let model = self.resolve_model(request);
        let method = match mode {
            RelayMode::Buffered => "generateContent",
            RelayMode::Streaming => "streamGenerateContent",
        };

        let endpoint = format!("{}:{}", model, method);
        let mut url = join_url(&self.base_url, &["models", endpoint.as_str()])?;
        {
            let mut query = url.query_pairs_mut();
            if mode == RelayMode::Streaming {
                query.append_pair("alt", "sse");
            }
            query.append_pair("key", credential.expose_secret());
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = serde_json::to_value(Self::upstream_body(request))
            .map_err(|e| Error::Internal(format!("Failed to encode Gemini request: {}", e)))?;

        Ok(UpstreamRequest { url, headers, body })
    }

    fn locators(&self) -> &'static [Locator] {
        LOCATORS
    }
}

const LOCATORS: &[Locator] = &[
    ("candidates[0].content.parts", candidate_parts),
    ("candidates[0].content.text", candidate_content_text),
    ("output", output_string),
];

fn first_candidate_content(value: &Value) -> Option<&Value> {
    value.get("candidates")?.as_array()?.first()?.get("content")
}

fn candidate_parts(value: &Value) -> Option<String> {
    let parts = first_candidate_content(value)?.get("parts")?.as_array()?;
    Some(join_part_texts(parts))
}

fn candidate_content_text(value: &Value) -> Option<String> {
    first_candidate_content(value)?
        .get("text")?
        .as_str()
        .map(str::to_string)
}
