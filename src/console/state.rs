use super::ConsoleError;
use crate::protocol::{ClientMessage, EndStatus, RunRequest, ServerMessage};
use std::collections::VecDeque;

/// Run lifecycle as seen by the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Command,
    Stdout,
    Stderr,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub kind: LineKind,
    pub text: String,
}

impl ConsoleLine {
    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Scrollback and run state for one console
#[derive(Debug)]
pub struct Console {
    state: RunState,
    status: ConnectionStatus,
    lines: VecDeque<ConsoleLine>,
    capacity: usize,
    exit_code: Option<i32>,
    /// Kind of the last scrollback line while it still waits for its newline
    open_line: Option<LineKind>,
}

impl Console {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RunState::Idle,
            status: ConnectionStatus::Disconnected,
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            exit_code: None,
            open_line: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn lines(&self) -> impl Iterator<Item = &ConsoleLine> {
        self.lines.iter()
    }

    /// Move to `running` and produce the message to send.
    ///
    /// Fails fast without touching the network when disconnected.
    pub fn begin_run(&mut self, request: RunRequest) -> Result<ClientMessage, ConsoleError> {
        if self.status != ConnectionStatus::Connected {
            self.push(ConsoleLine::new(LineKind::Error, "server connection not available"));
            return Err(ConsoleError::NotConnected);
        }
        if self.state == RunState::Running {
            return Err(ConsoleError::AlreadyRunning);
        }

        self.lines.clear();
        self.open_line = None;
        self.exit_code = None;
        self.state = RunState::Running;
        Ok(ClientMessage::RunScript { data: request })
    }

    /// Apply a server message; returns the status lines it appended.
    ///
    /// Output chunks go straight into scrollback, joined across chunks until
    /// a newline closes the line, and are not returned.
    pub fn apply(&mut self, message: &ServerMessage) -> Vec<ConsoleLine> {
        let mut added = Vec::new();
        match message {
            ServerMessage::Connected { message, .. } => {
                self.status = ConnectionStatus::Connected;
                added.push(ConsoleLine::new(LineKind::Info, message.clone()));
            }
            ServerMessage::ScriptStart { command, .. } => {
                added.push(ConsoleLine::new(LineKind::Command, format!("$ {}", command)));
            }
            ServerMessage::ScriptOutput { output, is_error } => {
                let kind = if *is_error { LineKind::Stderr } else { LineKind::Stdout };
                self.append_output(kind, output);
            }
            ServerMessage::ScriptEnd {
                exit_code, status, ..
            } => {
                self.exit_code = Some(*exit_code);
                let (state, text) = match status {
                    EndStatus::Cancelled => (RunState::Cancelled, "Script cancelled".to_string()),
                    EndStatus::Completed if *exit_code == 0 => (
                        RunState::Succeeded,
                        "Script completed successfully".to_string(),
                    ),
                    EndStatus::Completed => (
                        RunState::Failed,
                        format!("Script failed with exit code {}", exit_code),
                    ),
                };
                self.state = state;
                added.push(ConsoleLine::new(LineKind::Info, text));
            }
            ServerMessage::ScriptError { message, details } => {
                if self.state == RunState::Running {
                    self.state = RunState::Failed;
                }
                let text = match details {
                    Some(details) => format!("Error: {} ({})", message, details),
                    None => format!("Error: {}", message),
                };
                added.push(ConsoleLine::new(LineKind::Error, text));
            }
        }

        for line in &added {
            self.push(line.clone());
        }
        added
    }

    /// Record a dropped connection; an in-flight run is lost
    pub fn connection_lost(&mut self) -> ConsoleLine {
        self.status = ConnectionStatus::Disconnected;
        if self.state == RunState::Running {
            self.state = RunState::Failed;
        }
        let line = ConsoleLine::new(LineKind::Error, "Connection to server lost");
        self.push(line.clone());
        line
    }

    fn append_output(&mut self, kind: LineKind, chunk: &str) {
        let (body, terminated) = match chunk.strip_suffix('\n') {
            Some(body) => (body, true),
            None => (chunk, false),
        };
        if body.is_empty() && !terminated {
            return;
        }

        let continues = self.open_line == Some(kind);
        for (i, part) in body.split('\n').enumerate() {
            if i == 0 && continues {
                if let Some(last) = self.lines.back_mut() {
                    last.text.push_str(part);
                    continue;
                }
            }
            self.push(ConsoleLine::new(kind, part));
        }
        self.open_line = if terminated { None } else { Some(kind) };
    }

    fn push(&mut self, line: ConsoleLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.open_line = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_console() -> Console {
        let mut console = Console::new(100);
        console.apply(&ServerMessage::connected());
        console
    }

    #[test]
    fn test_run_requires_connection() {
        let mut console = Console::new(100);
        let err = console.begin_run(RunRequest::new("echo")).unwrap_err();
        assert!(matches!(err, ConsoleError::NotConnected));
        assert_eq!(console.state(), RunState::Idle);
        assert_eq!(
            console.lines().last().unwrap().text,
            "server connection not available"
        );
    }

    #[test]
    fn test_successful_run() {
        let mut console = connected_console();
        let msg = console.begin_run(RunRequest::new("/bin/echo").with_params("hello")).unwrap();
        assert!(matches!(msg, ClientMessage::RunScript { .. }));
        assert_eq!(console.state(), RunState::Running);
        // Previous output cleared
        assert_eq!(console.lines().count(), 0);

        console.apply(&ServerMessage::ScriptStart {
            command: "/bin/echo hello".into(),
            timestamp: String::new(),
        });
        let added = console.apply(&ServerMessage::ScriptOutput {
            output: "hello\n".into(),
            is_error: false,
        });
        assert!(added.is_empty());
        assert_eq!(
            console.lines().last(),
            Some(&ConsoleLine::new(LineKind::Stdout, "hello"))
        );

        console.apply(&ServerMessage::ScriptEnd {
            exit_code: 0,
            success: true,
            command: "/bin/echo hello".into(),
            status: EndStatus::Completed,
        });
        assert_eq!(console.state(), RunState::Succeeded);
        assert_eq!(console.exit_code(), Some(0));
        assert_eq!(console.lines().next().unwrap().text, "$ /bin/echo hello");
    }

    #[test]
    fn test_failure_states() {
        let mut console = connected_console();
        console.begin_run(RunRequest::new("x")).unwrap();
        assert!(matches!(
            console.begin_run(RunRequest::new("y")),
            Err(ConsoleError::AlreadyRunning)
        ));

        console.apply(&ServerMessage::ScriptEnd {
            exit_code: 2,
            success: false,
            command: "x".into(),
            status: EndStatus::Completed,
        });
        assert_eq!(console.state(), RunState::Failed);

        console.begin_run(RunRequest::new("x")).unwrap();
        console.apply(&ServerMessage::error("Script not allowed"));
        assert_eq!(console.state(), RunState::Failed);
        assert_eq!(console.lines().last().unwrap().kind, LineKind::Error);

        console.begin_run(RunRequest::new("x")).unwrap();
        console.apply(&ServerMessage::ScriptEnd {
            exit_code: -1,
            success: false,
            command: "x".into(),
            status: EndStatus::Cancelled,
        });
        assert_eq!(console.state(), RunState::Cancelled);
    }

    #[test]
    fn test_stderr_lines_and_scrollback_bound() {
        let mut console = Console::new(3);
        console.apply(&ServerMessage::connected());
        console.apply(&ServerMessage::ScriptOutput {
            output: "a\nb\nc\nd\n".into(),
            is_error: true,
        });

        let texts: Vec<_> = console.lines().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c", "d"]);
        assert!(console.lines().all(|l| l.kind == LineKind::Stderr));
    }

    #[test]
    fn test_chunks_join_into_lines() {
        let mut console = connected_console();
        console.begin_run(RunRequest::new("x")).unwrap();

        let chunk = |output: &str, is_error| ServerMessage::ScriptOutput {
            output: output.into(),
            is_error,
        };
        console.apply(&chunk("Pass", false));
        console.apply(&chunk("word: ", false));
        console.apply(&chunk("oops\n", true));
        console.apply(&chunk("\nnext\n\n", false));
        console.apply(&chunk("tail", false));

        let lines: Vec<_> = console.lines().map(|l| (l.kind, l.text.as_str())).collect();
        assert_eq!(
            lines,
            vec![
                (LineKind::Stdout, "Password: "),
                (LineKind::Stderr, "oops"),
                (LineKind::Stdout, ""),
                (LineKind::Stdout, "next"),
                (LineKind::Stdout, ""),
                (LineKind::Stdout, "tail"),
            ]
        );
    }

    #[test]
    fn test_connection_lost_fails_running() {
        let mut console = connected_console();
        console.begin_run(RunRequest::new("x")).unwrap();
        console.connection_lost();
        assert_eq!(console.state(), RunState::Failed);
        assert_eq!(console.status(), ConnectionStatus::Disconnected);
    }
}
