//! Connection records and per-connection run slots
//!
//! Every WebSocket connection is registered with the [`SessionManager`] under
//! a fresh [`ConnectionId`]. A connection owns an outbound message queue and a
//! run slot that holds at most one active script.

use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use uuid::Uuid;

/// Identifier of one transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The run currently occupying a connection's slot
#[derive(Debug)]
struct ActiveRun {
    run_id: Uuid,
    command: String,
    cancel: Option<oneshot::Sender<()>>,
}

/// Returned by [`Connection::claim_slot`]; the run owns the cancel receiver
#[derive(Debug)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub cancel: oneshot::Receiver<()>,
}

/// One client's transport session
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    slot: Mutex<Option<ActiveRun>>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
            slot: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Open while the writer side still drains the outbound queue
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a message for the client.
    ///
    /// Returns `false` and drops the message when the connection is closed.
    pub async fn send(&self, message: ServerMessage) -> bool {
        if !self.is_open() {
            tracing::debug!(connection = %self.id, "Dropping message for closed connection");
            return false;
        }
        match self.outbound.send(message).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(connection = %self.id, "Connection closed while sending");
                false
            }
        }
    }

    /// Reserve the run slot, or return the command already running
    pub async fn claim_slot(&self, command: &str) -> Result<RunTicket, String> {
        let mut slot = self.slot.lock().await;
        if let Some(active) = slot.as_ref() {
            return Err(active.command.clone());
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let run_id = Uuid::new_v4();
        *slot = Some(ActiveRun {
            run_id,
            command: command.to_string(),
            cancel: Some(cancel_tx),
        });

        Ok(RunTicket {
            run_id,
            cancel: cancel_rx,
        })
    }

    /// Free the slot if it still belongs to `run_id`
    pub async fn release_slot(&self, run_id: Uuid) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|active| active.run_id) == Some(run_id) {
            *slot = None;
        }
    }

    /// Queue a run's terminal message, then free its slot.
    ///
    /// Both happen under the slot lock: a concurrent [`claim_slot`] waits
    /// until the message is queued and then finds the slot free.
    ///
    /// [`claim_slot`]: Connection::claim_slot
    pub async fn finish_run(&self, run_id: Uuid, message: ServerMessage) -> bool {
        let mut slot = self.slot.lock().await;
        let sent = self.send(message).await;
        if slot.as_ref().map(|active| active.run_id) == Some(run_id) {
            *slot = None;
        }
        sent
    }

    /// Signal the active run to stop. Returns `false` when nothing is running.
    pub async fn cancel_active(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_mut().and_then(|active| active.cancel.take()) {
            Some(cancel) => {
                // The run may have finished between the lock and the send
                let _ = cancel.send(());
                true
            }
            None => false,
        }
    }

    pub async fn active_command(&self) -> Option<String> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|active| active.command.clone())
    }
}

/// Registry of open connections keyed by id
#[derive(Debug, Default)]
pub struct SessionManager {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a connection writing to `outbound`
    pub async fn register(&self, outbound: mpsc::Sender<ServerMessage>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(outbound));
        self.connections
            .write()
            .await
            .insert(connection.id(), connection.clone());
        connection
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(&id)
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}
