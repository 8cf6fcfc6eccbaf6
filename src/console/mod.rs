//! Native client console
//!
//! Mirrors the browser console in `assets/console.js`: the same run state
//! machine, bounded scrollback, and fixed-delay reconnect policy.

mod client;
mod state;

pub use client::{
    run_remote, Connector, RunOutcome, Supervisor, WsConnector, WsLink, RECONNECT_DELAY,
};
pub use state::{ConnectionStatus, Console, ConsoleLine, LineKind, RunState};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("server connection not available")]
    NotConnected,
    #[error("a script is already running in this console")]
    AlreadyRunning,
    #[error("connection to server lost")]
    ConnectionLost,
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
