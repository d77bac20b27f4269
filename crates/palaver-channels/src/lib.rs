//! Palaver Channels — chat front-ends that feed the message bus.
//!
//! - **base**: the `Channel` trait every front-end implements
//! - **manager**: `ChannelManager`, which runs channels and routes replies
//! - **formatting**: Markdown to Telegram HTML, message splitting
//!
//! Telegram lives behind the `telegram` feature.

pub mod base;
pub mod formatting;
pub mod manager;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use base::Channel;
pub use manager::ChannelManager;
