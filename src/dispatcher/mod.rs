//! Command dispatcher
//!
//! Turns a [`RunRequest`] into exactly one child process: validates it
//! against the allow-list, claims the connection's run slot, and spawns a task
//! that relays the executor's events back to the connection.

mod allowlist;
mod error;

pub use allowlist::{AllowList, AllowedScript};
pub use error::DispatchError;

use crate::protocol::{ClientMessage, RunRequest};
use crate::runner::{LaunchSpec, ScriptExecutor};
use crate::session::Connection;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct Dispatcher {
    allow_list: Arc<AllowList>,
    executor: ScriptExecutor,
    run_limit: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    pub fn new(
        allow_list: Arc<AllowList>,
        executor: ScriptExecutor,
        max_concurrent_runs: Option<usize>,
    ) -> Self {
        Self {
            allow_list,
            executor,
            run_limit: max_concurrent_runs.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Validate a request and build its invocation. Starts nothing.
    pub fn prepare(&self, request: &RunRequest) -> Result<LaunchSpec, DispatchError> {
        let path = request.path.trim();
        if path.is_empty() {
            return Err(DispatchError::EmptyPath);
        }

        let script = self
            .allow_list
            .resolve(path)
            .ok_or_else(|| DispatchError::NotAllowed {
                path: path.to_string(),
            })?;

        let mut args = Vec::new();

        if let Some(function) = request.function.as_deref().map(str::trim) {
            if !function.is_empty() {
                if !script.allows_function(function) {
                    return Err(DispatchError::FunctionNotAllowed {
                        script: script.name.clone(),
                        function: function.to_string(),
                    });
                }
                args.push(function.to_string());
            }
        }

        if let Some(params) = request.params.as_deref() {
            let words = shell_words::split(params).map_err(|e| DispatchError::InvalidParams {
                reason: e.to_string(),
            })?;
            args.extend(words);
        }

        Ok(LaunchSpec {
            program: script.program.clone(),
            args,
            working_dir: script.working_dir.clone(),
        })
    }

    fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, DispatchError> {
        match &self.run_limit {
            Some(limit) => limit
                .clone()
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| DispatchError::LimitReached),
            None => Ok(None),
        }
    }

    /// Start a run on `connection`.
    ///
    /// The returned task relays events until the run's terminal message. That
    /// message is queued while the slot is still held and the slot is freed
    /// under the same lock, so a follow-up request is neither refused as busy
    /// nor able to get its `script-start` ahead of the previous `script-end`.
    pub async fn run_script(
        &self,
        connection: Arc<Connection>,
        request: RunRequest,
    ) -> Result<JoinHandle<()>, DispatchError> {
        let spec = self.prepare(&request)?;
        let command = spec.command_line();

        let ticket = connection
            .claim_slot(&command)
            .await
            .map_err(|active| DispatchError::Busy { command: active })?;
        let permit = match self.acquire_permit() {
            Ok(permit) => permit,
            Err(e) => {
                connection.release_slot(ticket.run_id).await;
                return Err(e);
            }
        };

        tracing::info!(
            connection = %connection.id(),
            run = %ticket.run_id,
            command = %command,
            "Starting script"
        );

        let run_id = ticket.run_id;
        let mut events = self.executor.execute(spec, ticket.cancel);

        Ok(tokio::spawn(async move {
            let _permit = permit;
            while let Some(event) = events.next().await {
                if event.is_terminal() {
                    tracing::info!(connection = %connection.id(), run = %run_id, event = ?event, "Script finished");
                    connection.finish_run(run_id, event.into()).await;
                } else {
                    connection.send(event.into()).await;
                }
            }
            connection.release_slot(run_id).await;
        }))
    }

    /// Kill the script running on `connection`
    pub async fn cancel(&self, connection: &Connection) -> Result<(), DispatchError> {
        if connection.cancel_active().await {
            tracing::info!(connection = %connection.id(), "Cancelling script");
            Ok(())
        } else {
            Err(DispatchError::NothingRunning)
        }
    }

    /// Handle one decoded client message; refusals go back as `script-error`
    pub async fn handle(&self, connection: Arc<Connection>, message: ClientMessage) {
        let result = match message {
            ClientMessage::RunScript { data } => self
                .run_script(connection.clone(), data)
                .await
                .map(|_| ()),
            ClientMessage::CancelScript => self.cancel(&connection).await,
        };

        if let Err(err) = result {
            tracing::debug!(connection = %connection.id(), error = %err, "Request refused");
            connection.send(err.into()).await;
        }
    }

    /// Called by the transport once a connection is gone
    pub async fn connection_closed(&self, connection: &Connection, kill_running: bool) {
        match connection.active_command().await {
            Some(command) if kill_running => {
                tracing::info!(connection = %connection.id(), command = %command, "Killing script of closed connection");
                connection.cancel_active().await;
            }
            Some(command) => {
                tracing::warn!(connection = %connection.id(), command = %command, "Connection closed; script keeps running, output discarded");
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptEntry;
    use crate::protocol::{EndStatus, ServerMessage};
    use crate::runner::{Launcher, ProcessLauncher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::process::Child;
    use tokio::sync::mpsc;

    /// Counts launches and delegates to the real launcher
    #[derive(Default)]
    struct SpyLauncher {
        launches: AtomicUsize,
    }

    impl Launcher for SpyLauncher {
        fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Child> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            ProcessLauncher.launch(spec)
        }
    }

    fn entries() -> Vec<ScriptEntry> {
        vec![
            ScriptEntry {
                name: "echo".into(),
                path: "/bin/echo".into(),
                description: String::new(),
                functions: vec!["greet".into()],
                working_dir: None,
            },
            ScriptEntry {
                name: "sleep".into(),
                path: "/bin/sleep".into(),
                description: String::new(),
                functions: vec![],
                working_dir: None,
            },
        ]
    }

    fn dispatcher(limit: Option<usize>) -> (Dispatcher, Arc<SpyLauncher>) {
        let spy = Arc::new(SpyLauncher::default());
        let executor = ScriptExecutor::with_launcher(spy.clone());
        let dispatcher = Dispatcher::new(Arc::new(AllowList::new(&entries())), executor, limit);
        (dispatcher, spy)
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[test]
    fn test_prepare_builds_argv() {
        let (dispatcher, _) = dispatcher(None);
        let request = RunRequest::new("echo")
            .with_function("greet")
            .with_params("'hello world' $HOME; rm -rf /");
        let spec = dispatcher.prepare(&request).unwrap();

        assert_eq!(spec.program, std::path::PathBuf::from("/bin/echo"));
        assert_eq!(spec.args, vec!["greet", "hello world", "$HOME;", "rm", "-rf", "/"]);
    }

    #[test]
    fn test_prepare_rejections() {
        let (dispatcher, _) = dispatcher(None);

        assert_eq!(dispatcher.prepare(&RunRequest::new("   ")), Err(DispatchError::EmptyPath));
        assert!(matches!(
            dispatcher.prepare(&RunRequest::new("/bin/rm")),
            Err(DispatchError::NotAllowed { .. })
        ));
        assert!(matches!(
            dispatcher.prepare(&RunRequest::new("echo").with_function("destroy")),
            Err(DispatchError::FunctionNotAllowed { .. })
        ));
        assert!(matches!(
            dispatcher.prepare(&RunRequest::new("echo").with_params("\"unbalanced")),
            Err(DispatchError::InvalidParams { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_path_never_spawns() {
        let (dispatcher, spy) = dispatcher(None);
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Arc::new(Connection::new(tx));

        dispatcher
            .handle(conn.clone(), ClientMessage::RunScript { data: RunRequest::new(" \t") })
            .await;

        assert_eq!(recv(&mut rx).await, ServerMessage::error("No command specified"));
        assert_eq!(spy.launches.load(Ordering::SeqCst), 0);
        assert!(conn.active_command().await.is_none());
    }

    #[tokio::test]
    async fn test_second_run_is_busy() {
        let (dispatcher, spy) = dispatcher(None);
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Arc::new(Connection::new(tx));

        dispatcher
            .run_script(conn.clone(), RunRequest::new("sleep").with_params("30"))
            .await
            .unwrap();
        assert!(matches!(recv(&mut rx).await, ServerMessage::ScriptStart { .. }));

        let err = dispatcher
            .run_script(conn.clone(), RunRequest::new("echo").with_params("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Busy { ref command } if command == "/bin/sleep 30"));
        assert_eq!(spy.launches.load(Ordering::SeqCst), 1);

        dispatcher.cancel(&conn).await.unwrap();
        match recv(&mut rx).await {
            ServerMessage::ScriptEnd { status, success, .. } => {
                assert_eq!(status, EndStatus::Cancelled);
                assert!(!success);
            }
            other => panic!("Expected script-end, got {:?}", other),
        }

        // Slot is free again
        let handle = dispatcher
            .run_script(conn.clone(), RunRequest::new("echo").with_params("again"))
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(spy.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_without_run() {
        let (dispatcher, _) = dispatcher(None);
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Arc::new(Connection::new(tx));

        dispatcher.handle(conn, ClientMessage::CancelScript).await;
        assert_eq!(recv(&mut rx).await, ServerMessage::error("No script is running"));
    }

    #[tokio::test]
    async fn test_global_run_limit() {
        let (dispatcher, _) = dispatcher(Some(1));
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, _rx_b) = mpsc::channel(16);
        let a = Arc::new(Connection::new(tx_a));
        let b = Arc::new(Connection::new(tx_b));

        dispatcher
            .run_script(a.clone(), RunRequest::new("sleep").with_params("30"))
            .await
            .unwrap();
        assert_eq!(
            dispatcher
                .run_script(b.clone(), RunRequest::new("echo"))
                .await
                .unwrap_err(),
            DispatchError::LimitReached
        );
        // The refused run does not keep b's slot
        assert!(b.active_command().await.is_none());

        // A busy connection is reported as busy, not as over the limit
        assert!(matches!(
            dispatcher.run_script(a.clone(), RunRequest::new("echo")).await,
            Err(DispatchError::Busy { .. })
        ));

        dispatcher.cancel(&a).await.unwrap();
        loop {
            if recv(&mut rx_a).await.is_terminal() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_closed_connection_kills_run() {
        let (dispatcher, _) = dispatcher(None);
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Arc::new(Connection::new(tx));

        let handle = dispatcher
            .run_script(conn.clone(), RunRequest::new("sleep").with_params("30"))
            .await
            .unwrap();
        assert!(matches!(recv(&mut rx).await, ServerMessage::ScriptStart { .. }));

        drop(rx);
        dispatcher.connection_closed(&conn, true).await;

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should stop after disconnect")
            .unwrap();
        assert!(conn.active_command().await.is_none());
    }
}
