//! Switchyard Core Library
//!
//! Routing, transformation and streaming core for an LLM API gateway. Clients
//! speak one wire format (Anthropic Messages, OpenAI Chat Completions, OpenAI
//! Responses); providers may speak another. Requests are routed to a
//! `provider,model` target, reshaped through transformer chains, dispatched,
//! and answered with the reshaped response, falling back to alternate
//! providers when an upstream fails.

pub mod config;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod protocol;
pub mod providers;
pub mod router;
pub mod server;
pub mod streaming;
pub mod telemetry;
pub mod tokenizer;
pub mod transformers;

pub use error::{GatewayError, GatewayResult};
pub use pipeline::Gateway;

/// Returns the version of the Switchyard Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
