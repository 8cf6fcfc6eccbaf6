use crate::protocol::ServerMessage;
use thiserror::Error;

/// Reasons a run request or cancel is refused before any process starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("No command specified")]
    EmptyPath,
    #[error("Script not allowed")]
    NotAllowed { path: String },
    #[error("Function not allowed")]
    FunctionNotAllowed { script: String, function: String },
    #[error("Invalid parameters")]
    InvalidParams { reason: String },
    #[error("A script is already running")]
    Busy { command: String },
    #[error("Run limit reached")]
    LimitReached,
    #[error("No script is running")]
    NothingRunning,
}

impl DispatchError {
    pub fn details(&self) -> Option<String> {
        match self {
            DispatchError::EmptyPath | DispatchError::NothingRunning => None,
            DispatchError::NotAllowed { path } => {
                Some(format!("'{}' is not in the script allow-list", path))
            }
            DispatchError::FunctionNotAllowed { script, function } => {
                Some(format!("'{}' does not accept function '{}'", script, function))
            }
            DispatchError::InvalidParams { reason } => Some(reason.clone()),
            DispatchError::Busy { command } => Some(format!("Still running: {}", command)),
            DispatchError::LimitReached => {
                Some("Too many scripts are running on this server".to_string())
            }
        }
    }
}

impl From<DispatchError> for ServerMessage {
    fn from(err: DispatchError) -> Self {
        ServerMessage::ScriptError {
            message: err.to_string(),
            details: err.details(),
        }
    }
}
