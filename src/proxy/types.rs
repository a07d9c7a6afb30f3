//! Inbound chat request and normalized response types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::provider::Provider;

/// A chat message as sent by the caller.
///
/// `content` is normally a string; OpenAI-style part arrays are accepted and
/// forwarded untouched to OpenRouter.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

impl Message {
    /// Plain-text view of the content.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Value::String(s) => Some(s.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect(),
            other => other.to_string(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

/// Validated inbound `/api/chat` request.
///
/// The original body is kept so OpenRouter can receive every field the
/// caller sent, not just the ones understood here.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub provider: Provider,
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub body: Map<String, Value>,
}

/// Body fields that select the provider; never forwarded upstream as strings.
pub const PROVIDER_FIELDS: [&str; 2] = ["provider", "company"];

impl ChatRequest {
    /// Validate a JSON body into a chat request.
    pub fn from_json(body: Value) -> Result<Self> {
        let Value::Object(body) = body else {
            return Err(Error::BadRequest(
                "request body must be a JSON object".to_string(),
            ));
        };

        let provider = PROVIDER_FIELDS
            .iter()
            .find_map(|field| body.get(*field).and_then(Value::as_str))
            .map(Provider::from_name)
            .unwrap_or_default();

        // Scalars are taken as their text; anything else counts as no model.
        let model = match body.get("model") {
            Some(Value::String(m)) if !m.trim().is_empty() => Some(m.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(true)) => Some("true".to_string()),
            _ => None,
        };

        let Some(Value::Array(raw_messages)) = body.get("messages") else {
            return Err(Error::BadRequest("messages must be an array".to_string()));
        };

        let messages = raw_messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                Message::deserialize(m).map_err(|e| {
                    Error::BadRequest(format!("messages[{}] is not a valid message: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            provider,
            model,
            messages,
            body,
        })
    }
}

/// Role and text of the single normalized choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedChoice {
    pub message: AssistantMessage,
}

/// Uniform `/api/chat` response regardless of provider.
///
/// `raw` always carries the upstream payload for caller-side debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub success: bool,
    pub provider: String,
    pub model: String,
    pub choices: Vec<NormalizedChoice>,
    pub raw: Value,
}

impl NormalizedResponse {
    pub fn new(
        success: bool,
        provider: Provider,
        model: String,
        content: String,
        raw: Value,
    ) -> Self {
        Self {
            success,
            provider: provider.as_str().to_string(),
            model,
            choices: vec![NormalizedChoice {
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
            }],
            raw,
        }
    }
}
