use super::state::{ConnectionStatus, Console, ConsoleLine, LineKind, RunState};
use super::ConsoleError;
use crate::protocol::{ClientMessage, RunRequest, ServerMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::io::Write;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Fixed delay between connection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Opens one transport link to the bridge
#[async_trait]
pub trait Connector: Send + Sync {
    type Link: Send;

    async fn connect(&self) -> Result<Self::Link, ConsoleError>;
}

/// Keeps a console connected: retries forever with a fixed delay, no backoff.
pub struct Supervisor<C> {
    connector: C,
    delay: Duration,
    status: watch::Sender<ConnectionStatus>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, delay: Duration) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            connector,
            delay,
            status,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Connect now, retrying every `delay` until it works
    pub async fn connect(&self) -> C::Link {
        loop {
            match self.connector.connect().await {
                Ok(link) => {
                    self.status.send_replace(ConnectionStatus::Connected);
                    return link;
                }
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?self.delay, "Connection attempt failed");
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }

    /// The previous link closed: wait `delay`, then connect again
    pub async fn reconnect(&self) -> C::Link {
        self.status.send_replace(ConnectionStatus::Disconnected);
        tokio::time::sleep(self.delay).await;
        self.connect().await
    }
}

pub type WsLink = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for a bridge URL such as `ws://127.0.0.1:4444/ws`
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> Result<WsLink, ConsoleError> {
        let (link, _response) = connect_async(self.url.as_str()).await?;
        tracing::debug!(url = %self.url, "Connected");
        Ok(link)
    }
}

/// Final state of a console run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    pub exit_code: Option<i32>,
}

impl RunOutcome {
    /// Exit code for the `run` subcommand
    pub fn process_exit_code(&self) -> i32 {
        match self.state {
            RunState::Succeeded => 0,
            RunState::Cancelled => 130,
            _ => self.exit_code.filter(|code| *code > 0).unwrap_or(1),
        }
    }
}

fn render(line: &ConsoleLine) {
    match line.kind {
        LineKind::Stdout | LineKind::Command | LineKind::Info => println!("{}", line.text),
        LineKind::Stderr | LineKind::Error => eprintln!("{}", line.text),
    }
}

/// Write output chunks through as-is so partial lines show up right away
fn render_chunk(output: &str, is_error: bool) {
    let result = if is_error {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(output.as_bytes()).and_then(|_| stderr.flush())
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(output.as_bytes()).and_then(|_| stdout.flush())
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Failed to write script output");
    }
}

fn show(console: &mut Console, message: &ServerMessage) {
    if let ServerMessage::ScriptOutput { output, is_error } = message {
        render_chunk(output, *is_error);
    }
    console.apply(message).iter().for_each(render);
}

async fn send(link: &mut WsLink, message: &ClientMessage) -> Result<(), ConsoleError> {
    let text = serde_json::to_string(message)?;
    link.send(Message::Text(text)).await?;
    Ok(())
}

/// Next decoded server message, or `None` once the link is gone
async fn next_message(link: &mut WsLink) -> Option<ServerMessage> {
    while let Some(frame) = link.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!(error = %e, "Ignoring undecodable server message"),
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Connection error");
                return None;
            }
        }
    }
    None
}

/// Connect to `url`, run `request`, print its output, and report how it ended.
///
/// Connection attempts repeat every [`RECONNECT_DELAY`] until the server
/// acknowledges. Ctrl-C while the script runs sends `cancel-script`.
pub async fn run_remote(
    url: &str,
    request: RunRequest,
    scrollback: usize,
) -> Result<RunOutcome, ConsoleError> {
    let supervisor = Supervisor::new(WsConnector::new(url), RECONNECT_DELAY);
    let mut console = Console::new(scrollback);

    let mut link = supervisor.connect().await;
    loop {
        match next_message(&mut link).await {
            Some(message) => {
                show(&mut console, &message);
                if console.status() == ConnectionStatus::Connected {
                    break;
                }
            }
            None => link = supervisor.reconnect().await,
        }
    }

    let run = console.begin_run(request)?;
    send(&mut link, &run).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            message = next_message(&mut link) => match message {
                Some(message) => {
                    show(&mut console, &message);
                    if console.state().is_finished() {
                        return Ok(RunOutcome {
                            state: console.state(),
                            exit_code: console.exit_code(),
                        });
                    }
                }
                None => {
                    render(&console.connection_lost());
                    return Err(ConsoleError::ConnectionLost);
                }
            },
            _ = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                send(&mut link, &ClientMessage::CancelScript).await?;
            }
        }
    }
}
