//! Client for an agent exposing an OpenAI-style `/api/v1/chat/completions`
//! endpoint.
//!
//! - [`AgentClient::complete`] performs a buffered call and returns a
//!   [`Completion`].
//! - [`AgentClient::stream`] returns a [`CompletionStream`] of
//!   [`StreamEvent`]s decoded incrementally from the server-sent-event body.

mod client;
mod error;
pub mod stream;
mod types;

pub use client::AgentClient;
pub use error::AgentError;
pub use stream::{CompletionStream, StreamEvent};
pub use types::{AgentEndpoint, AgentFlags, AgentMessage, Completion};
