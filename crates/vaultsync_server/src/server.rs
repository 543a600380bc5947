//! Async vault server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::message::{Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vaultsync_core::{Cipher, CommitGate, CoreError, EncryptionKey, RecordStore};

/// The vault server.
///
/// Store operations are synchronous; the server runs each one on the
/// blocking pool under the configured deadline. A request that misses
/// its deadline is answered with a retryable `storage_timeout` error and
/// is guaranteed to have written nothing: the task runs inside a
/// [`CommitGate`] that the server abandons on timeout, and the store
/// checks the gate under its journal lock. If the task already passed
/// the gate, the server waits for its real result instead.
///
/// # Example
///
/// ```ignore
/// let server = VaultServer::new(ServerConfig::default(), store, Arc::new(AesGcmCipher), key)?;
/// let sweeper = server.spawn_sweeper();
/// let response = server.handle(Request::Stats).await;
/// ```
#[derive(Clone)]
pub struct VaultServer {
    handler: Arc<RequestHandler>,
    request_timeout: Duration,
}

impl VaultServer {
    /// Creates a server over `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured backup directory cannot be
    /// opened.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn RecordStore>,
        cipher: Arc<dyn Cipher>,
        key: EncryptionKey,
    ) -> ServerResult<Self> {
        let context = HandlerContext::new(config, store, cipher, key)?;
        Ok(Self::with_context(Arc::new(context)))
    }

    /// Creates a server from an existing context.
    pub fn with_context(context: Arc<HandlerContext>) -> Self {
        let request_timeout = context.config.request_timeout;
        Self {
            handler: Arc::new(RequestHandler::new(context)),
            request_timeout,
        }
    }

    /// The synchronous handler.
    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.handler.context().config
    }

    /// Handles one request under the request deadline.
    pub async fn handle(&self, request: Request) -> Response {
        let op = request.op_name();
        let after_ms = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX);
        let gate = CommitGate::new(op, after_ms);
        let handler = Arc::clone(&self.handler);
        let task_gate = Arc::clone(&gate);
        let mut task = tokio::task::spawn_blocking(move || {
            let _scope = task_gate.enter();
            handler.handle(request)
        });

        let joined = match tokio::time::timeout(self.request_timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) if gate.abandon() => {
                let err = ServerError::Core(CoreError::storage_timeout(op, after_ms));
                tracing::warn!(op, after_ms, "request exceeded deadline");
                return Response::error(&err);
            }
            Err(_) => {
                tracing::debug!(op, after_ms, "deadline passed mid-commit, awaiting result");
                task.await
            }
        };

        match joined {
            Ok(response) => response,
            Err(join_error) => {
                let err = ServerError::Internal(format!("{op} handler panicked: {join_error}"));
                tracing::error!(op, error = %err, "request task failed");
                Response::error(&err)
            }
        }
    }

    /// Handles one JSON-encoded request, returning the JSON response.
    pub async fn handle_json(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let err = ServerError::Malformed(e.to_string());
                tracing::debug!(error = %err, "rejected malformed request");
                Response::error(&err)
            }
        };
        encode_response(&response)
    }

    /// Starts the periodic expiry sweep.
    ///
    /// Each pass removes expired records one id lock at a time and prunes
    /// the change log. The task stops when the returned handle is shut
    /// down or dropped.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let (stop, mut stopped) = watch::channel(false);
        let handler = Arc::clone(&self.handler);
        let interval = self.config().sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let handler = Arc::clone(&handler);
                match tokio::task::spawn_blocking(move || handler.sweep()).await {
                    Ok(Ok(report)) => {
                        tracing::debug!(removed = report.removed, pruned = report.pruned, "sweep pass")
                    }
                    Ok(Err(e)) => tracing::error!(error = %e, "sweep pass failed"),
                    Err(e) => tracing::error!(error = %e, "sweep task failed"),
                }
            }
            tracing::info!("sweeper stopped");
        });

        tracing::info!(interval = ?interval, "sweeper started");
        SweeperHandle { stop, task }
    }
}

/// Serializes a response; falls back to a fixed error line if that fails.
pub(crate) fn encode_response(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to encode response");
        r#"{"op":"error","category":"unexpected","message":"response encoding failed","retryable":false}"#
            .to_owned()
    })
}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "sweeper did not stop cleanly");
        }
    }
}
