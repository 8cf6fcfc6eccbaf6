mod executor;
mod launcher;
mod types;

pub use executor::{RunStream, ScriptExecutor};
pub use launcher::{LaunchSpec, Launcher, ProcessLauncher};
pub use types::RunEvent;
