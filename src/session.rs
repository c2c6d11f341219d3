//! Session management
//!
//! The public-facing state machine: spawns the analysis engine, performs the
//! initialization handshake, exposes document and query operations, and owns
//! the single background I/O worker that multiplexes reading server frames
//! and writing queued messages.
//!
//! Lifecycle: `Created -> Initializing -> Ready -> ShuttingDown -> Terminated`.
//! Construction only returns Ready sessions; exceeding the initialization
//! bound is a fatal construction failure.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lsp_types::Uri;
use serde_json::Value;

use crate::capabilities::Capabilities;
use crate::config::{ConfigError, SessionConfig};
use crate::dispatch::{self, NotificationRouter, TransactionTable};
use crate::documents::{DocumentError, DocumentStore};
use crate::framing::{self, FrameDecoder};
use crate::process::{ChildProcess, ProcessError};
use crate::protocol::{self, OutboundMessage, PUBLISH_DIAGNOSTICS_METHOD};
use crate::recorder::{RecorderError, WireDirection, WireLog};

// ============================================================================
// Session State & Errors
// ============================================================================

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    Ready,
    ShuttingDown,
    Terminated,
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid project root: {0}")]
    InvalidRoot(String),

    #[error("Initialization handshake did not complete within {0:?}")]
    InitializationTimeout(Duration),
}

// ============================================================================
// Shared Session State
// ============================================================================

/// State shared between caller threads and the I/O worker
struct SessionShared {
    state: Mutex<SessionState>,
    outgoing: mpsc::UnboundedSender<OutboundMessage>,
    transactions: TransactionTable,
    notifications: NotificationRouter,
    documents: DocumentStore,
    capabilities: Mutex<Option<Capabilities>>,
    cancel: CancellationToken,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Whether shutdown has begun; messages queued now are discarded
    fn closing(&self) -> bool {
        matches!(
            self.state(),
            SessionState::ShuttingDown | SessionState::Terminated
        )
    }

    /// Queue a message for the I/O worker; silently discarded once the
    /// worker is gone
    fn enqueue(&self, message: OutboundMessage) {
        if self.outgoing.send(message).is_err() {
            debug!("Discarding message queued after I/O worker exit");
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// A live connection to the analysis engine
///
/// Operations may be invoked from multiple threads; every operation besides
/// construction and [`shutdown`](Self::shutdown) enqueues work and returns
/// immediately. Query results arrive later through the caller-supplied
/// handler, invoked on the I/O worker — handlers must not block.
pub struct Session {
    shared: Arc<SessionShared>,
    process: tokio::sync::Mutex<Option<ChildProcess>>,
    io_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.shared.state())
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn the engine and complete the handshake.
    ///
    /// Blocks until the session is Ready or the initialization bound is
    /// exceeded; on failure the engine process is killed and no session
    /// exists.
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        let recorder = config
            .record_path
            .as_deref()
            .map(WireLog::create)
            .transpose()?;

        let stderr_handler = config.stderr_handler.clone().map(|handler| {
            Box::new(move |line: String| handler(line)) as Box<dyn Fn(String) + Send + Sync>
        });

        let working_directory = config.working_directory.as_ref().or(Some(&config.root));
        let mut process = ChildProcess::spawn(
            &config.server_command,
            &config.server_args,
            working_directory,
            stderr_handler,
        )?;

        let (stdin, stdout) = match process.take_stdio() {
            Ok(stdio) => stdio,
            Err(e) => {
                process.kill_sync();
                return Err(e.into());
            }
        };

        let session = match Self::start_io(
            stdout,
            stdin,
            &config.root,
            recorder,
            config.init_timeout,
            config.stop_timeout,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                process.kill_sync();
                return Err(e);
            }
        };

        *session.process.lock().await = Some(process);
        Ok(session)
    }

    /// Start the I/O worker over an established byte pipe and run the
    /// handshake to completion.
    async fn start_io<R, W>(
        reader: R,
        writer: W,
        root: &Path,
        recorder: Option<WireLog>,
        init_timeout: Duration,
        stop_timeout: Duration,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let shared = Arc::new(SessionShared {
            state: Mutex::new(SessionState::Created),
            outgoing: outgoing_tx,
            transactions: TransactionTable::new(),
            notifications: NotificationRouter::new(),
            documents: DocumentStore::new(),
            capabilities: Mutex::new(None),
            cancel: cancel.clone(),
        });

        let io_task = tokio::spawn(io_loop(
            reader,
            writer,
            outgoing_rx,
            Arc::clone(&shared),
            recorder.map(Arc::new),
        ));

        shared.set_state(SessionState::Initializing);

        let root_uri = root_uri(root)?;
        let init = protocol::initialize(root_uri)?;

        // The handshake handler captures the advertised capabilities first,
        // then acknowledges, then flips the session to Ready.
        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(id) = init.id {
            let handler_shared = Arc::clone(&shared);
            shared.transactions.register(id, move |message| {
                let raw = message
                    .get("result")
                    .and_then(|result| result.get("capabilities"))
                    .cloned()
                    .unwrap_or(Value::Null);
                *handler_shared.capabilities.lock().unwrap() = Some(Capabilities::from_raw(raw));

                match protocol::initialized() {
                    Ok(ack) => handler_shared.enqueue(ack),
                    Err(e) => error!("Failed to build handshake acknowledgment: {e}"),
                }

                handler_shared.set_state(SessionState::Ready);
                let _ = ready_tx.send(());
            });
        }
        shared.enqueue(init);

        match tokio::time::timeout(init_timeout, ready_rx).await {
            Ok(Ok(())) => {
                info!("Session ready");
            }
            _ => {
                error!("Initialization handshake did not complete within {init_timeout:?}");
                cancel.cancel();
                let _ = io_task.await;
                shared.set_state(SessionState::Terminated);
                return Err(SessionError::InitializationTimeout(init_timeout));
            }
        }

        Ok(Self {
            shared,
            process: tokio::sync::Mutex::new(None),
            io_task: tokio::sync::Mutex::new(Some(io_task)),
            stop_timeout,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether the session is Ready for operations
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Capabilities captured at handshake
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.shared.capabilities.lock().unwrap().clone()
    }

    /// Check whether a file is currently open
    pub fn is_file_open(&self, path: &Path) -> bool {
        self.shared.documents.is_open(path)
    }

    /// Number of currently open files
    pub fn open_files_count(&self) -> usize {
        self.shared.documents.open_count()
    }

    /// Register the diagnostics-push callback, invoked with the raw
    /// notification params
    pub fn set_diagnostic_callback<F>(&self, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared
            .notifications
            .register(PUBLISH_DIAGNOSTICS_METHOD, callback);
    }

    /// Register a callback for an arbitrary server-push method
    pub fn on_notification<F>(&self, method: &str, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared.notifications.register(method, callback);
    }

    // ========================================================================
    // Document operations
    // ========================================================================

    /// Open a file, sending its full text to the server.
    ///
    /// Idempotent: an already-open file is neither re-read from disk nor
    /// re-announced.
    pub fn open_file(&self, path: &Path) -> Result<(), SessionError> {
        if self.shared.closing() {
            return Ok(());
        }

        let (document, created) = self.shared.documents.open(path)?;
        if !created {
            debug!("File {} already open, skipping", path.display());
            return Ok(());
        }

        let message = {
            let document = document.lock().unwrap();
            protocol::did_open(
                document.uri().clone(),
                document.language_id(),
                document.version(),
                document.text(),
            )?
        };
        self.shared.enqueue(message);
        Ok(())
    }

    /// Close a file. Closing a file that is not open emits nothing.
    pub fn close_file(&self, path: &Path) -> Result<(), SessionError> {
        if self.shared.closing() {
            return Ok(());
        }

        match self.shared.documents.close(path) {
            Some(document) => {
                let uri = document.lock().unwrap().uri().clone();
                self.shared.enqueue(protocol::did_close(uri)?);
            }
            None => debug!("File {} was not open", path.display()),
        }
        Ok(())
    }

    /// Replace a file's entire content, emitting a full-text change
    pub fn modify_file_full(&self, path: &Path, content: &str) -> Result<(), SessionError> {
        if self.shared.closing() {
            return Ok(());
        }

        let (document, _) = self.shared.documents.open(path)?;
        let message = {
            let mut document = document.lock().unwrap();
            let version = document.replace_all(content);
            protocol::did_change_full(document.uri().clone(), version, document.text())?
        };
        self.shared.enqueue(message);
        Ok(())
    }

    /// Replace a single line, emitting an incremental ranged change.
    ///
    /// Fails without mutation if `row` is out of range; replacing a line with
    /// identical text emits nothing.
    pub fn modify_file_line(
        &self,
        path: &Path,
        row: usize,
        text: &str,
    ) -> Result<(), SessionError> {
        if self.shared.closing() {
            return Ok(());
        }

        let (document, _) = self.shared.documents.open(path)?;
        let message = {
            let mut document = document.lock().unwrap();
            match document.replace_line(row, text)? {
                Some(edit) => Some(protocol::did_change_range(
                    document.uri().clone(),
                    edit.version,
                    edit.range,
                    edit.text,
                )?),
                None => None,
            }
        };

        if let Some(message) = message {
            self.shared.enqueue(message);
        }
        Ok(())
    }

    // ========================================================================
    // Query operations
    // ========================================================================

    /// Request completion at a position
    pub fn request_completion<F>(
        &self,
        path: &Path,
        row: u32,
        col: u32,
        handler: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let uri = match self.query_uri(path)? {
            Some(uri) => uri,
            None => return Ok(()),
        };
        self.enqueue_query(protocol::completion(uri, row, col)?, handler);
        Ok(())
    }

    /// Request the definition of the symbol at a position
    pub fn request_definition<F>(
        &self,
        path: &Path,
        row: u32,
        col: u32,
        handler: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let uri = match self.query_uri(path)? {
            Some(uri) => uri,
            None => return Ok(()),
        };
        self.enqueue_query(protocol::definition(uri, row, col)?, handler);
        Ok(())
    }

    /// Request signature help at a position
    pub fn request_signature_help<F>(
        &self,
        path: &Path,
        row: u32,
        col: u32,
        handler: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let uri = match self.query_uri(path)? {
            Some(uri) => uri,
            None => return Ok(()),
        };
        self.enqueue_query(protocol::signature_help(uri, row, col)?, handler);
        Ok(())
    }

    /// Request semantic tokens for a whole document, or a delta against a
    /// previous result
    pub fn request_semantic_tokens<F>(
        &self,
        path: &Path,
        previous_result_id: Option<&str>,
        handler: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let uri = match self.query_uri(path)? {
            Some(uri) => uri,
            None => return Ok(()),
        };
        let message = match previous_result_id {
            Some(previous) => protocol::semantic_tokens_delta(uri, previous)?,
            None => protocol::semantic_tokens_full(uri)?,
        };
        self.enqueue_query(message, handler);
        Ok(())
    }

    /// Resolve a query target to its URI; `None` means the session is
    /// closing and the query is silently discarded
    fn query_uri(&self, path: &Path) -> Result<Option<Uri>, SessionError> {
        if self.shared.closing() {
            return Ok(None);
        }
        let (document, _) = self.shared.documents.open(path)?;
        let uri = document.lock().unwrap().uri().clone();
        Ok(Some(uri))
    }

    /// Register the handler under the request's transaction id and queue it
    fn enqueue_query<F>(&self, message: OutboundMessage, handler: F)
    where
        F: FnOnce(Value) + Send + 'static,
    {
        if let Some(id) = message.id {
            self.shared.transactions.register(id, handler);
        }
        self.shared.enqueue(message);
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Shut the session down: stop the I/O worker (closing the engine's
    /// stdin), wait bounded time for the process to exit, then force-kill.
    ///
    /// Idempotent and safe to call from any path. Pending transactions are
    /// left unresolved.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if matches!(
                *state,
                SessionState::ShuttingDown | SessionState::Terminated
            ) {
                debug!("Shutdown already in progress");
                return;
            }
            *state = SessionState::ShuttingDown;
        }

        info!("Shutting down session");
        self.shared.cancel.cancel();

        if let Some(task) = self.io_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("I/O worker join error: {e}");
            }
        }

        if let Some(mut process) = self.process.lock().await.take() {
            process.stop(self.stop_timeout).await;
        }

        self.shared.set_state(SessionState::Terminated);
        info!("Session terminated");
    }
}

/// Force-cleanup fallback when the session is dropped without `shutdown()`
impl Drop for Session {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(process) = self.process.get_mut().as_mut() {
            if process.is_running() {
                warn!("Session dropped without shutdown(); killing server process");
                process.kill_sync();
            }
        }
    }
}

// ============================================================================
// I/O worker
// ============================================================================

/// The single background worker owning all pipe I/O.
///
/// Each turn either drains available inbound bytes (dispatching every
/// completed frame) or drains the outgoing FIFO completely, serializing and
/// writing each queued message in enqueue order. Terminates on cancellation,
/// on end-of-stream (the process-exit signal), or on a fatal protocol fault.
async fn io_loop<R, W>(
    mut reader: R,
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<OutboundMessage>,
    shared: Arc<SessionShared>,
    recorder: Option<Arc<WireLog>>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 64 * 1024];

    'io: loop {
        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => {
                debug!("I/O worker cancelled");
                break 'io;
            }

            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    info!("Server closed its output stream");
                    break 'io;
                }
                Ok(n) => {
                    decoder.push(&chunk[..n]);
                    loop {
                        match decoder.try_next() {
                            Ok(Some(body)) => {
                                record(&recorder, WireDirection::Inbound, &framing::encode(&body));
                                dispatch::dispatch(&body, &shared.transactions, &shared.notifications);
                            }
                            Ok(None) => break,
                            Err(e) => {
                                error!("Protocol fault, aborting connection: {e}");
                                break 'io;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to read from server: {e}");
                    break 'io;
                }
            },

            message = outgoing.recv() => {
                let Some(first) = message else {
                    debug!("Outgoing channel closed");
                    break 'io;
                };

                // Drain the whole queue in FIFO order before flushing.
                let mut batch = vec![first];
                while let Ok(next) = outgoing.try_recv() {
                    batch.push(next);
                }

                for message in batch {
                    match message.to_bytes() {
                        Ok(body) => {
                            let frame = framing::encode(&body);
                            if let Err(e) = writer.write_all(&frame).await {
                                warn!("Failed to write to server: {e}");
                                break 'io;
                            }
                            record(&recorder, WireDirection::Outbound, &frame);
                        }
                        Err(e) => error!("Failed to serialize outgoing message: {e}"),
                    }
                }

                if let Err(e) = writer.flush().await {
                    warn!("Failed to flush writes: {e}");
                    break 'io;
                }
            }
        }
    }

    // Dropping the writer closes the engine's stdin; pending transactions
    // stay unresolved.
    shared.set_state(SessionState::Terminated);
}

fn record(recorder: &Option<Arc<WireLog>>, direction: WireDirection, frame: &[u8]) {
    if let Some(log) = recorder {
        if let Err(e) = log.append(direction, frame) {
            warn!("Failed to record wire traffic: {e}");
        }
    }
}

fn root_uri(root: &Path) -> Result<Uri, SessionError> {
    let abs = root
        .canonicalize()
        .map_err(|e| SessionError::InvalidRoot(format!("{}: {}", root.display(), e)))?;
    format!("file://{}", abs.display())
        .parse()
        .map_err(|_| SessionError::InvalidRoot(format!("{} is not a valid URI", abs.display())))
}

// ============================================================================
// Tests
// ============================================================================
