//! Channel trait — the seam between a chat front-end and the dispatcher.
//!
//! A channel turns platform updates into [`InboundMessage`]s on the bus and
//! delivers the [`OutboundMessage`]s routed back to it.
//!
//! [`InboundMessage`]: palaver_core::bus::InboundMessage

use async_trait::async_trait;
use palaver_core::bus::OutboundMessage;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Name used as `InboundMessage.channel`, `OutboundMessage.channel`, and
    /// the first half of every user id this channel produces.
    fn name(&self) -> &str;

    /// Listen for messages until [`stop`](Self::stop) is called.
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver one reply.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}
