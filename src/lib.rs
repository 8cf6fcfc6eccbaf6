pub mod builder;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod transport;

// Re-export commonly used items
pub use builder::{build_app, serve};
pub use config::BridgeConfig;
pub use protocol::{ClientMessage, RunRequest, ServerMessage};
