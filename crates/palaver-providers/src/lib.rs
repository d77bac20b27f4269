//! Reasoning backend layer for Palaver.
//!
//! - [`traits::Backend`] — hands out one [`traits::BackendConnection`] per user
//! - [`traits::BackendConnection`] — sends a prompt, yields the reply as a fragment stream
//! - [`http_provider::HttpBackend`] — OpenAI-compatible `/chat/completions` client with SSE streaming
//! - [`streaming::SseStreamParser`] — splits an SSE byte stream into `data:` payloads

pub mod http_provider;
pub mod streaming;
pub mod traits;

pub use http_provider::HttpBackend;
pub use traits::{Backend, BackendConnection, BackendError, Prompt, ReplyStream};
