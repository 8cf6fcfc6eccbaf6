//! App builder - turns a config into a ready-to-serve router
//!
//! Used by the main binary and the integration tests.

use crate::config::BridgeConfig;
use crate::transport::{router, AppState};
use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;

/// Build the router with all routes and shared state
pub fn build_app(config: &BridgeConfig) -> Router {
    let state = AppState::from_config(config);

    if state.dispatcher.allow_list().is_empty() {
        tracing::warn!("No scripts are allow-listed; every run request will be refused");
    }
    for script in state.dispatcher.allow_list().scripts() {
        tracing::info!("  {} -> {}", script.name, script.program.display());
    }

    router(state)
}

/// Serve `app` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
