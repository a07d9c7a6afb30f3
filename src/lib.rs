//! llm-relay - chat-completion relay for OpenRouter and Google Gemini
//!
//! This library provides the core functionality for the relay, including
//! configuration, credential rotation, provider adapters and the HTTP server.

pub mod config;
pub mod error;
pub mod provider;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
