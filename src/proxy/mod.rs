//! HTTP relay server module.
//!
//! Accepts chat requests, forwards them to the selected provider with a
//! rotated credential, and answers with either a normalized JSON response
//! or a relayed event stream.

mod fetch;
mod handlers;
mod server;
pub mod stream;
pub mod types;

pub use fetch::{fetch_payload, read_payload, send_upstream, timed_fetch};
pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use types::{ChatRequest, Message, NormalizedResponse};
