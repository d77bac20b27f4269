//! Channel Manager — runs every registered channel and routes replies.
//!
//! Inbound traffic goes straight from a channel onto the bus; the manager
//! only owns the outbound direction, handing each reply to the channel named
//! in `OutboundMessage.channel`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use palaver_core::bus::{MessageBus, OutboundMessage};

use crate::base::Channel;

pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    bus: Arc<MessageBus>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
        }
    }

    /// Register a channel, replacing any previous one with the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "Registered channel");
        self.channels.insert(name, channel);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// Registered channel names, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel and route outbound messages until `shutdown`
    /// resolves, then deliver whatever is still queued, stop the channels
    /// and wait for them to exit.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        if self.channels.is_empty() {
            warn!("No channels registered, outbound messages will be dropped");
        }
        info!(channels = ?self.channel_names(), "Starting channels");

        let mut listeners = JoinSet::new();
        for (name, channel) in &self.channels {
            let channel = channel.clone();
            let name = name.clone();
            listeners.spawn(async move {
                if let Err(e) = channel.start().await {
                    error!(channel = %name, error = %e, "Channel stopped with an error");
                } else {
                    info!(channel = %name, "Channel stopped");
                }
            });
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                msg = self.bus.consume_outbound() => match msg {
                    Some(msg) => self.route(&msg).await,
                    None => {
                        info!("Outbound bus closed");
                        break;
                    }
                },
            }
        }

        let mut flushed = 0usize;
        while let Some(msg) = self.bus.try_consume_outbound().await {
            self.route(&msg).await;
            flushed += 1;
        }
        if flushed > 0 {
            info!(flushed, "Delivered queued replies before stopping");
        }

        self.stop_all().await;
        while listeners.join_next().await.is_some() {}
        Ok(())
    }

    /// Deliver one reply to the channel it names. Delivery failures are
    /// logged, never returned.
    pub async fn route(&self, msg: &OutboundMessage) {
        let Some(channel) = self.channels.get(&msg.channel) else {
            warn!(channel = %msg.channel, chat_id = %msg.chat_id, "No channel registered for outbound message");
            return;
        };
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, len = msg.content.len(), "Routing reply");
        if let Err(e) = channel.send(msg).await {
            error!(channel = %msg.channel, chat_id = %msg.chat_id, error = %e, "Failed to deliver reply");
        }
    }

    pub async fn stop_all(&self) {
        for (name, channel) in &self.channels {
            debug!(channel = %name, "Stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "Channel stop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{Mutex, Notify};

    struct MockChannel {
        name: String,
        stopped: AtomicBool,
        wake: Notify,
        sent: Mutex<Vec<String>>,
        fail_send: bool,
    }

    impl MockChannel {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
                sent: Mutex::new(Vec::new()),
                fail_send: false,
            })
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.wake.notified().await;
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            self.wake.notify_one();
            Ok(())
        }

        async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
            if self.fail_send {
                anyhow::bail!("network down");
            }
            self.sent.lock().await.push(msg.content.clone());
            Ok(())
        }
    }

    #[test]
    fn test_register_and_names() {
        let mut mgr = ChannelManager::new(Arc::new(MessageBus::new(8)));
        assert!(mgr.is_empty());

        mgr.register(MockChannel::new("telegram"));
        mgr.register(MockChannel::new("cli"));
        mgr.register(MockChannel::new("telegram"));

        assert_eq!(mgr.len(), 2);
        assert_eq!(mgr.channel_names(), vec!["cli", "telegram"]);
        assert!(mgr.get("telegram").is_some());
        assert!(mgr.get("discord").is_none());
    }

    #[tokio::test]
    async fn test_route_to_named_channel() {
        let mut mgr = ChannelManager::new(Arc::new(MessageBus::new(8)));
        let tg = MockChannel::new("telegram");
        mgr.register(tg.clone());

        mgr.route(&OutboundMessage::new("telegram", "1", "3.2x")).await;
        mgr.route(&OutboundMessage::new("nowhere", "1", "lost")).await;

        assert_eq!(*tg.sent.lock().await, vec!["3.2x".to_string()]);
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let mut mgr = ChannelManager::new(Arc::new(MessageBus::new(8)));
        mgr.register(Arc::new(MockChannel {
            name: "telegram".into(),
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
            sent: Mutex::new(Vec::new()),
            fail_send: true,
        }));
        mgr.route(&OutboundMessage::new("telegram", "1", "hi")).await;
    }

    #[tokio::test]
    async fn test_run_routes_until_shutdown() {
        let bus = Arc::new(MessageBus::new(8));
        let mut mgr = ChannelManager::new(bus.clone());
        let tg = MockChannel::new("telegram");
        mgr.register(tg.clone());

        bus.publish_outbound(OutboundMessage::new("telegram", "1", "first"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("telegram", "2", "second"))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let runner = tokio::spawn(async move {
            mgr.run(async {
                let _ = stop_rx.await;
            })
            .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(*tg.sent.lock().await, vec!["first", "second"]);
        assert!(tg.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_queued_replies_are_delivered_on_shutdown() {
        let bus = Arc::new(MessageBus::new(8));
        let mut mgr = ChannelManager::new(bus.clone());
        let tg = MockChannel::new("telegram");
        mgr.register(tg.clone());

        for text in ["first", "second", "third"] {
            bus.publish_outbound(OutboundMessage::new("telegram", "1", text))
                .await
                .unwrap();
        }
        // Already stopped before the loop starts.
        mgr.run(std::future::ready(())).await.unwrap();

        assert_eq!(*tg.sent.lock().await, vec!["first", "second", "third"]);
        assert!(tg.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_without_channels_drains_outbound() {
        let bus = Arc::new(MessageBus::new(1));
        let mgr = ChannelManager::new(bus.clone());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let runner = tokio::spawn(async move {
            mgr.run(async {
                let _ = stop_rx.await;
            })
            .await
        });

        // Capacity is one, so the second publish only completes once the
        // first message has been taken off the bus.
        for text in ["a", "b", "c"] {
            bus.publish_outbound(OutboundMessage::new("nowhere", "1", text))
                .await
                .unwrap();
        }
        stop_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();
    }
}
