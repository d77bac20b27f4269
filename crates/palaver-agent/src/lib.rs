//! Palaver Agent — per-user session lifecycle on top of the backend and the
//! conversation store.
//!
//! - **session**: `SessionManager`, the registry of live backend connections
//!   keyed by user, plus the error taxonomy it reports
//! - **context**: prompt construction from the active conversation
//! - **commands**: `/new`, `/history`, `/conversations`, … shared by every channel
//! - **dispatcher**: bus consumer that runs one task per inbound message

pub mod commands;
pub mod context;
pub mod dispatcher;
pub mod session;

pub use commands::Command;
pub use context::ContextBuilder;
pub use dispatcher::Dispatcher;
pub use session::{ExchangeOutcome, History, SessionError, SessionHandle, SessionManager};
