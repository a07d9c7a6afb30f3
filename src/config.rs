//! Configuration parsing and validation for llm-relay.
//!
//! Configuration is assembled once at startup from built-in defaults, an
//! optional TOML file and environment overrides, then shared read-only.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

use crate::provider::Provider;

/// Root configuration structure.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
}

/// How `/api/chat` answers: one buffered normalized JSON body, or a raw
/// server-sent-event relay of the upstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    #[default]
    Buffered,
    Streaming,
}

impl RelayMode {
    /// Parse a mode name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffered" | "normalized" => Some(Self::Buffered),
            "streaming" | "stream" | "sse" => Some(Self::Streaming),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Streaming => "streaming",
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:3000")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upstream chat request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Timeout for the live model catalog fetch in milliseconds
    #[serde(default = "default_models_timeout_ms")]
    pub models_timeout_ms: u64,
    /// Requests accepted per minute across the whole process (0 disables)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u64,
    /// Origins allowed for cross-origin requests; "*" allows any
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub mode: RelayMode,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_models_timeout_ms() -> u64 {
    10_000
}

fn default_rate_limit() -> u64 {
    60
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            timeout_ms: default_timeout_ms(),
            models_timeout_ms: default_models_timeout_ms(),
            rate_limit_per_minute: default_rate_limit(),
            allowed_origins: default_allowed_origins(),
            mode: RelayMode::default(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn models_timeout(&self) -> Duration {
        Duration::from_millis(self.models_timeout_ms)
    }

    /// Whether any origin is accepted.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The raw value is only reachable through [`ApiKey::expose_secret`], so every
/// place a key leaves the process can be found with `grep expose_secret`.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Where a provider's key pool came from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Literal strings in the config file
    Literal,
    /// Config file values containing ${VAR} references
    EnvExpanded,
    /// Comma-separated list read from an environment variable (holds var name)
    Environment(String),
    /// No keys configured
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Environment(var) => write!(f, "environment ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for the provider's API
    pub base_url: String,
    /// Rotation pool, in rotation order
    pub api_keys: Vec<ApiKey>,
    /// Model used when the request names none
    pub default_model: Option<String>,
    pub key_source: KeySource,
}

impl ProviderConfig {
    fn defaults_for(provider: Provider) -> Self {
        let (base_url, default_model) = match provider {
            Provider::OpenRouter => ("https://openrouter.ai/api/v1", None),
            Provider::Google => (
                "https://generativelanguage.googleapis.com/v1beta",
                Some("gemini-2.5-flash".to_string()),
            ),
        };
        Self {
            base_url: base_url.to_string(),
            api_keys: Vec::new(),
            default_model,
            key_source: KeySource::None,
        }
    }
}

/// Configuration for every supported provider.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub openrouter: ProviderConfig,
    pub google: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openrouter: ProviderConfig::defaults_for(Provider::OpenRouter),
            google: ProviderConfig::defaults_for(Provider::Google),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::OpenRouter => &self.openrouter,
            Provider::Google => &self.google,
        }
    }

    fn get_mut(&mut self, provider: Provider) -> &mut ProviderConfig {
        match provider {
            Provider::OpenRouter => &mut self.openrouter,
            Provider::Google => &mut self.google,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw provider section deserialized directly from TOML.
/// Keys are plain strings so they may still contain `${VAR}` references.
#[derive(Debug, Default, Deserialize)]
pub struct RawProviderConfig {
    base_url: Option<String>,
    #[serde(default)]
    api_keys: Vec<String>,
    default_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawProvidersConfig {
    #[serde(default)]
    openrouter: Option<RawProviderConfig>,
    #[serde(default)]
    google: Option<RawProviderConfig>,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    providers: RawProvidersConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Split a comma-separated key list, trimming and dropping empty entries.
pub fn split_key_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Environment variable holding the comma-separated key pool for a provider.
pub fn key_pool_env_var(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenRouter => "API_KEYS",
        Provider::Google => "GEMINI_KEYS",
    }
}

fn parse_env_number<F>(lookup: &F, var: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => {
            value.trim().parse::<u64>().map(Some).map_err(|e| {
                ConfigError::Validation(format!("{} must be a whole number: {}", var, e))
            })
        }
        _ => Ok(None),
    }
}

impl Config {
    /// Convert raw (deserialized) config to final config, expanding `${VAR}`
    /// references in key values with the given lookup.
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut providers = ProvidersConfig::default();

        for (provider, section) in [
            (Provider::OpenRouter, raw.providers.openrouter),
            (Provider::Google, raw.providers.google),
        ] {
            let Some(section) = section else { continue };
            let target = providers.get_mut(provider);

            if let Some(base_url) = section.base_url {
                target.base_url = base_url;
            }
            if section.default_model.is_some() {
                target.default_model = section.default_model;
            }

            let mut expanded_any = false;
            for raw_key in &section.api_keys {
                let value = if raw_key.contains("${") {
                    expanded_any = true;
                    expand_env_vars_with(raw_key, provider.as_str(), &lookup)?
                } else {
                    raw_key.clone()
                };
                // An expanded reference may itself hold a comma-separated list.
                target
                    .api_keys
                    .extend(split_key_list(&value).into_iter().map(ApiKey::from));
            }

            target.key_source = match (target.api_keys.is_empty(), expanded_any) {
                (true, _) => KeySource::None,
                (false, true) => KeySource::EnvExpanded,
                (false, false) => KeySource::Literal,
            };
        }

        Ok(Config {
            server: raw.server,
            providers,
        })
    }

    /// Apply environment overrides using a custom lookup function.
    ///
    /// Recognized variables: `PORT`, `API_TIMEOUT_MS`, `MODELS_TIMEOUT_MS`,
    /// `ALLOWED_ORIGINS`, `RATE_LIMIT_MAX`, `RELAY_MODE`, `API_KEYS` and
    /// `GEMINI_KEYS`. A key pool variable replaces the pool from the file.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_env_number(&lookup, "PORT")? {
            if port > u16::MAX as u64 {
                return Err(ConfigError::Validation(format!(
                    "PORT out of range: {}",
                    port
                )));
            }
            self.server.listen = format!("0.0.0.0:{}", port);
        }
        if let Some(ms) = parse_env_number(&lookup, "API_TIMEOUT_MS")? {
            self.server.timeout_ms = ms;
        }
        if let Some(ms) = parse_env_number(&lookup, "MODELS_TIMEOUT_MS")? {
            self.server.models_timeout_ms = ms;
        }
        if let Some(max) = parse_env_number(&lookup, "RATE_LIMIT_MAX")? {
            self.server.rate_limit_per_minute = max;
        }
        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            let origins = split_key_list(&origins);
            if !origins.is_empty() {
                self.server.allowed_origins = origins;
            }
        }
        if let Some(mode) = lookup("RELAY_MODE") {
            self.server.mode = RelayMode::parse(&mode).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "RELAY_MODE must be 'buffered' or 'streaming', got '{}'",
                    mode
                ))
            })?;
        }

        for provider in Provider::ALL {
            let var = key_pool_env_var(provider);
            let Some(value) = lookup(var) else { continue };
            let keys = split_key_list(&value);
            if keys.is_empty() {
                continue;
            }
            let target = self.providers.get_mut(provider);
            target.api_keys = keys.into_iter().map(ApiKey::from).collect();
            target.key_source = KeySource::Environment(var.to_string());
        }

        Ok(())
    }

    /// Parse configuration from a TOML string, expanding with the given lookup.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let config = Self::from_raw_with(raw, lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults, an optional TOML file and the
    /// given environment lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
                Self::from_raw_with(raw, &lookup)?
            }
            None => Config::default(),
        };

        config.apply_env_with(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults, an optional TOML file and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.server.models_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "models_timeout_ms must be greater than zero".to_string(),
            ));
        }

        for provider in Provider::ALL {
            let section = self.providers.get(provider);
            if reqwest::Url::parse(&section.base_url).is_err() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has invalid base_url '{}'",
                    provider.as_str(),
                    section.base_url
                )));
            }
            if section.api_keys.is_empty() {
                tracing::warn!(
                    provider = provider.as_str(),
                    env = key_pool_env_var(provider),
                    "No API keys configured - requests to this provider will fail"
                );
            }
        }

        Ok(())
    }
}
