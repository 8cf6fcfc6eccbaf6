mod http;
mod ws;

pub use http::router;

use crate::config::BridgeConfig;
use crate::dispatcher::{AllowList, Dispatcher};
use crate::runner::ScriptExecutor;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub sessions: Arc<SessionManager>,
    pub kill_on_disconnect: bool,
    pub scrollback_lines: usize,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, kill_on_disconnect: bool, scrollback_lines: usize) -> Self {
        Self {
            dispatcher,
            sessions: Arc::new(SessionManager::new()),
            kill_on_disconnect,
            scrollback_lines,
            started_at: Instant::now(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let allow_list = Arc::new(AllowList::new(&config.scripts));
        let dispatcher = Dispatcher::new(
            allow_list,
            ScriptExecutor::new(),
            config.max_concurrent_runs,
        );
        Self::new(dispatcher, config.kill_on_disconnect, config.scrollback_lines)
    }
}
