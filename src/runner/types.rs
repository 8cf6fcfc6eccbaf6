use crate::protocol::{now_rfc3339, EndStatus, ServerMessage};

/// Stream events from one script run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Process launched
    Started { command: String },

    /// One chunk of output as read from the pipe
    Output { text: String, is_error: bool },

    /// Process exited or was killed
    Finished {
        command: String,
        exit_code: i32,
        status: EndStatus,
    },

    /// Launch or wait failed; no `Finished` follows
    Failed {
        message: String,
        details: Option<String>,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Finished { .. } | RunEvent::Failed { .. })
    }
}

impl From<RunEvent> for ServerMessage {
    fn from(event: RunEvent) -> Self {
        match event {
            RunEvent::Started { command } => ServerMessage::ScriptStart {
                command,
                timestamp: now_rfc3339(),
            },
            RunEvent::Output { text, is_error } => ServerMessage::ScriptOutput {
                output: text,
                is_error,
            },
            RunEvent::Finished {
                command,
                exit_code,
                status,
            } => ServerMessage::ScriptEnd {
                exit_code,
                success: exit_code == 0 && status == EndStatus::Completed,
                command,
                status,
            },
            RunEvent::Failed { message, details } => ServerMessage::ScriptError { message, details },
        }
    }
}
