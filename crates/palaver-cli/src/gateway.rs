//! `palaver gateway` — channels, dispatcher, and graceful shutdown.
//!
//! Startup:
//! 1. Load config, open the store, build the session manager
//! 2. Create the message bus and register enabled channels
//! 3. Run the dispatcher and the channel manager side by side
//! 4. On Ctrl+C stop the dispatcher and let it drain in-flight exchanges,
//!    then stop the channels once the drained replies are delivered, then
//!    release every session

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::{error, info};

use palaver_agent::Dispatcher;
use palaver_channels::ChannelManager;
use palaver_core::bus::MessageBus;
use palaver_core::config::load_config;

use crate::helpers;

/// Inbound and outbound queue depth.
const BUS_CAPACITY: usize = 100;

pub async fn run() -> Result<()> {
    let config = load_config(None);
    let manager = helpers::build_manager(&config)?;
    let bus = Arc::new(MessageBus::new(BUS_CAPACITY));

    #[allow(unused_mut)]
    let mut channels = ChannelManager::new(bus.clone());

    #[cfg(feature = "telegram")]
    {
        let tg = &config.channels.telegram;
        if tg.is_enabled() {
            use palaver_channels::telegram::TelegramChannel;
            channels.register(Arc::new(TelegramChannel::new(
                &tg.token,
                bus.clone(),
                tg.allowed_users.clone(),
            )));
        }
    }

    let reply_timeout = Duration::from_secs(config.sessions.reply_timeout_secs);
    let dispatcher = Dispatcher::new(manager.clone(), bus.clone(), reply_timeout);

    info!(
        model = %config.backend.model,
        store = manager.store().backend_name(),
        channels = ?channels.channel_names(),
        "Gateway starting"
    );
    println!();
    println!("  Palaver gateway");
    println!("  Model:    {}", config.backend.model);
    println!(
        "  Storage:  {} ({})",
        config.storage.backend,
        config.storage.resolved_path().display()
    );
    println!("  Channels: {} registered", channels.len());
    if channels.is_empty() {
        println!("  ⚠  No channels registered. Set channels.telegram.token in ~/.palaver/config.json");
        println!("     and build with --features telegram.");
    }
    println!("  Ctrl+C to stop");
    println!();

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        println!("\n  Shutting down...");
    };
    if let Err(e) = serve(&dispatcher, &channels, ctrl_c).await {
        error!(error = %e, "Channel manager error");
    }

    manager.shutdown().await;
    println!("  Gateway stopped. Goodbye!");
    Ok(())
}

/// Run the dispatcher and the channels until `shutdown` resolves.
///
/// The channels keep routing until the dispatcher has drained its in-flight
/// exchanges, so replies produced during shutdown still reach the user.
pub(crate) async fn serve(
    dispatcher: &Dispatcher,
    channels: &ChannelManager,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let dispatcher_done = Notify::new();
    let channels_stopped = dispatcher_done.notified();

    let (_, channel_result) = tokio::join!(
        async {
            dispatcher.run(shutdown).await;
            dispatcher_done.notify_waiters();
        },
        channels.run(channels_stopped),
    );
    channel_result
}
