use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A client's instruction to run one allow-listed script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunRequest {
    /// Script name or configured path
    #[serde(default)]
    pub path: String,

    /// Parameter string, split with shell quoting rules into argv entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,

    /// Named sub-function passed as the first argument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl RunRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

/// Messages sent by a console to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Start a script on this connection
    RunScript { data: RunRequest },

    /// Kill the script currently running on this connection
    CancelScript,
}

/// How a finished run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EndStatus {
    /// The process exited on its own
    Completed,
    /// The process was killed by a cancel request or a disconnect
    Cancelled,
}

/// Messages sent by the bridge to a console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once, immediately after the connection opens
    Connected { timestamp: String, message: String },

    /// The process was launched; echoes the resolved command line
    ScriptStart { command: String, timestamp: String },

    /// One chunk of process output
    #[serde(rename_all = "camelCase")]
    ScriptOutput { output: String, is_error: bool },

    /// The process finished
    #[serde(rename_all = "camelCase")]
    ScriptEnd {
        exit_code: i32,
        success: bool,
        command: String,
        status: EndStatus,
    },

    /// The request was rejected or the process could not be launched
    ScriptError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl ServerMessage {
    pub fn connected() -> Self {
        ServerMessage::Connected {
            timestamp: now_rfc3339(),
            message: "Connected to script bridge".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::ScriptError {
            message: message.into(),
            details: None,
        }
    }

    pub fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        ServerMessage::ScriptError {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Whether this message closes a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::ScriptEnd { .. } | ServerMessage::ScriptError { .. }
        )
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
