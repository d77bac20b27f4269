//! Dispatcher — consumes the inbound bus and answers each message.
//!
//! Every inbound message gets its own task, so a slow reply for one user
//! never delays another. Messages from the same user still run one at a
//! time because [`SessionManager`] serializes them per user.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use palaver_core::bus::{InboundMessage, MessageBus, OutboundMessage};

use crate::commands::{self, Command};
use crate::session::{SessionError, SessionManager};

pub struct Dispatcher {
    manager: Arc<SessionManager>,
    bus: Arc<MessageBus>,
    reply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(manager: Arc<SessionManager>, bus: Arc<MessageBus>, reply_timeout: Duration) -> Self {
        Self {
            manager,
            bus,
            reply_timeout,
        }
    }

    /// Answer inbound messages until `shutdown` resolves or the bus closes,
    /// then wait for the tasks still in flight.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        info!(timeout_secs = self.reply_timeout.as_secs(), "Dispatcher started, waiting for messages");
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            let msg = tokio::select! {
                _ = &mut shutdown => break,
                msg = self.bus.consume_inbound() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            // Reap finished tasks so the set does not grow unbounded.
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "Message task panicked");
                }
            }

            let manager = Arc::clone(&self.manager);
            let outbound = self.bus.outbound_sender();
            let timeout = self.reply_timeout;
            tasks.spawn(async move {
                if let Some(reply) = handle_inbound(&manager, &msg, timeout).await {
                    if let Err(e) = outbound.send(reply).await {
                        error!(error = %e, "Failed to publish outbound message");
                    }
                }
            });
        }

        info!(in_flight = tasks.len(), "Dispatcher stopping, draining in-flight messages");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Message task panicked");
            }
        }
    }
}

/// Produce the reply for one inbound message, or `None` when nothing should
/// be sent back.
pub async fn handle_inbound(
    manager: &SessionManager,
    msg: &InboundMessage,
    reply_timeout: Duration,
) -> Option<OutboundMessage> {
    let user = match msg.user_id() {
        Ok(user) => user,
        Err(e) => {
            warn!(channel = %msg.channel, sender = %msg.sender_id, error = %e, "Rejecting message from invalid user");
            let err = SessionError::from(e);
            return Some(OutboundMessage::reply_to(msg, err.user_message()));
        }
    };

    if let Some(command) = Command::parse(&msg.content) {
        if command == Command::Quit {
            debug!(user = %user, "Ignoring /quit outside the REPL");
            return None;
        }
        let text = match commands::execute(manager, &user, &command).await {
            Ok(text) => text,
            Err(e) => {
                warn!(user = %user, error = %e, "Command failed");
                e.user_message().to_string()
            }
        };
        return Some(OutboundMessage::reply_to(msg, text));
    }

    let text = match tokio::time::timeout(reply_timeout, manager.on_user_text(&user, &msg.content)).await {
        Ok(Ok(outcome)) => {
            if let Some(warning) = &outcome.storage_warning {
                warn!(user = %user, warning = %warning, "Reply delivered but not recorded");
            }
            outcome.reply
        }
        Ok(Err(e)) => {
            warn!(user = %user, error = %e, "Exchange failed");
            e.user_message().to_string()
        }
        Err(_) => {
            warn!(user = %user, timeout_secs = reply_timeout.as_secs(), "Exchange timed out");
            SessionError::BackendUnavailable("timed out".into())
                .user_message()
                .to_string()
        }
    };
    Some(OutboundMessage::reply_to(msg, text))
}
