//! Defensive text extraction from unstructured upstream payloads.
//!
//! Upstream bodies are treated as opaque JSON trees. Each provider contributes
//! an ordered list of locators; the first locator that finds non-empty text wins.
//! Locators only read through `Value::get`/`as_*`, so no input can make them fail.

use serde_json::Value;

use super::ProviderAdapter;

/// Placeholder content used when no text can be extracted.
pub const NO_CONTENT: &str = "[No content]";

/// A named shape locator: returns the text found at one known location.
pub type Locator = (&'static str, fn(&Value) -> Option<String>);

/// Run locators in order, returning the first non-empty text.
pub(crate) fn run_locators(locators: &[Locator], value: &Value) -> Option<String> {
    locators.iter().find_map(|(name, locate)| {
        let text = locate(value).filter(|t| !t.is_empty())?;
        tracing::trace!(locator = name, "Extracted upstream text");
        Some(text)
    })
}

/// Extract assistant text with `primary`, then `fallback`, then the placeholder.
pub fn extract_content(
    primary: &dyn ProviderAdapter,
    fallback: &dyn ProviderAdapter,
    response: &Value,
) -> String {
    primary
        .extract_text(response)
        .or_else(|| fallback.extract_text(response))
        .unwrap_or_else(|| {
            tracing::debug!(
                provider = %primary.provider(),
                "No text found in upstream response"
            );
            NO_CONTENT.to_string()
        })
}

/// Concatenate the `text` field of every part, treating missing text as empty.
pub(crate) fn join_part_texts(parts: &[Value]) -> String {
    parts
        .iter()
        .map(|p| p.get("text").and_then(Value::as_str).unwrap_or(""))
        .collect()
}

/// Top-level `output` string; used by both providers.
pub(crate) fn output_string(value: &Value) -> Option<String> {
    value.get("output")?.as_str().map(str::to_string)
}
