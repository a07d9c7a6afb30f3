//! Upstream provider adapters and credential rotation.
//!
//! Each provider is reached through a [`ProviderAdapter`], which knows how to
//! translate a [`ChatRequest`] into the provider's wire request and how to pull
//! the assistant text back out of whatever JSON the provider answers with.

mod gemini;
mod normalize;
mod openrouter;
mod rotation;

pub use gemini::GeminiAdapter;
pub use normalize::{extract_content, Locator, NO_CONTENT};
pub use openrouter::OpenRouterAdapter;
pub use rotation::{CredentialPool, Credentials};

use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::Serialize;

use crate::config::{ApiKey, ProvidersConfig, RelayMode};
use crate::error::{Error, Result};
use crate::proxy::types::ChatRequest;

/// A supported upstream LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenRouter,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::OpenRouter, Provider::Google];

    /// Resolve the provider named by a request.
    ///
    /// `google` and `gemini` select Gemini; every other name falls through to
    /// OpenRouter, which is also the default when no name is given.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Provider::Google,
            _ => Provider::OpenRouter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::Google => "google",
        }
    }

    /// Human-facing name used in error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "OpenRouter",
            Provider::Google => "Gemini",
        }
    }

    /// The provider whose extractor is tried when this one finds nothing.
    pub fn other(&self) -> Self {
        match self {
            Provider::OpenRouter => Provider::Google,
            Provider::Google => Provider::OpenRouter,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Provider-specific request translation and response text extraction.
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Model name reported back to the caller for this request.
    fn resolve_model(&self, request: &ChatRequest) -> String;

    /// Translate a chat request into the provider's wire request.
    fn build_request(
        &self,
        request: &ChatRequest,
        credential: &ApiKey,
        mode: RelayMode,
    ) -> Result<UpstreamRequest>;

    /// Ordered shape locators used by [`ProviderAdapter::extract_text`].
    fn locators(&self) -> &'static [Locator];

    /// Pull assistant text out of an upstream payload.
    ///
    /// Total over any JSON input: shape mismatches yield `None`.
    fn extract_text(&self, response: &serde_json::Value) -> Option<String> {
        normalize::run_locators(self.locators(), response)
    }
}

/// The adapter set, one per provider.
pub struct Adapters {
    openrouter: OpenRouterAdapter,
    google: GeminiAdapter,
}

impl Adapters {
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            openrouter: OpenRouterAdapter::new(parse_base_url(&config.openrouter.base_url)?),
            google: GeminiAdapter::new(
                parse_base_url(&config.google.base_url)?,
                config
                    .google
                    .default_model
                    .clone()
                    .unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string()),
            ),
        })
    }

    pub fn get(&self, provider: Provider) -> &dyn ProviderAdapter {
        match provider {
            Provider::OpenRouter => &self.openrouter,
            Provider::Google => &self.google,
        }
    }

    /// Normalized assistant text for a response from `provider`, trying the
    /// other provider's extractor before settling on the placeholder.
    pub fn extract_content(&self, provider: Provider, response: &serde_json::Value) -> String {
        extract_content(self.get(provider), self.get(provider.other()), response)
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    Url::parse(base_url)
        .map_err(|e| Error::Internal(format!("Invalid provider base URL '{}': {}", base_url, e)))
}

/// Append path segments to a base URL, keeping any base path.
pub(crate) fn join_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Internal(format!("Provider base URL '{}' cannot be a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
