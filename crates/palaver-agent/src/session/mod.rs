//! Per-user session lifecycle.

mod error;
mod handle;
mod manager;

pub use error::SessionError;
pub use handle::SessionHandle;
pub use manager::{ExchangeOutcome, History, SessionManager, SessionSettings};
