//! Session configuration
//!
//! Provides SessionConfig with builder pattern, validation, and defaults for
//! the analysis engine command, timeouts, and optional wire recording.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default bound on the initialization handshake (2 seconds)
///
/// The session polls for readiness up to this long; exceeding it is a fatal
/// construction failure.
pub const DEFAULT_INITIALIZATION_TIMEOUT_MS: u64 = 2000;

/// Default bound on waiting for the child to exit at shutdown (5 seconds)
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;

/// Default analysis engine command
pub const DEFAULT_SERVER_COMMAND: &str = "clangd";

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Project root does not exist: {0}")]
    RootNotFound(PathBuf),
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Complete session configuration
#[derive(Clone)]
pub struct SessionConfig {
    /// Project root the handshake advertises to the server
    pub root: PathBuf,

    /// Analysis engine command
    pub server_command: String,

    /// Additional engine command-line arguments
    pub server_args: Vec<String>,

    /// Working directory for the engine process (defaults to the root)
    pub working_directory: Option<PathBuf>,

    /// Wire-recording target; `None` disables recording
    pub record_path: Option<PathBuf>,

    /// Bound on the initialization handshake
    pub init_timeout: Duration,

    /// Bound on waiting for the child to exit at shutdown
    pub stop_timeout: Duration,

    /// Optional stderr handler for process monitoring
    pub stderr_handler: Option<Arc<dyn Fn(String) + Send + Sync>>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("root", &self.root)
            .field("server_command", &self.server_command)
            .field("server_args", &self.server_args)
            .field("working_directory", &self.working_directory)
            .field("record_path", &self.record_path)
            .field("init_timeout", &self.init_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .field(
                "stderr_handler",
                &self.stderr_handler.as_ref().map(|_| "Fn(String)"),
            )
            .finish()
    }
}

impl SessionConfig {
    /// Start building a configuration
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for SessionConfig with validation and defaults
#[derive(Default)]
pub struct SessionConfigBuilder {
    root: Option<PathBuf>,
    server_command: Option<String>,
    server_args: Vec<String>,
    working_directory: Option<PathBuf>,
    record_path: Option<PathBuf>,
    init_timeout: Option<Duration>,
    stop_timeout: Option<Duration>,
    stderr_handler: Option<Arc<dyn Fn(String) + Send + Sync>>,
}

impl SessionConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project root (required)
    pub fn root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = Some(root.as_ref().to_path_buf());
        self
    }

    /// Set the analysis engine command
    pub fn server_command(mut self, command: impl Into<String>) -> Self {
        self.server_command = Some(command.into());
        self
    }

    /// Append an engine command-line argument
    pub fn server_arg(mut self, arg: impl Into<String>) -> Self {
        self.server_args.push(arg.into());
        self
    }

    /// Set the engine's working directory
    pub fn working_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Enable wire recording to `path`
    pub fn record_to(mut self, path: impl AsRef<Path>) -> Self {
        self.record_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override the initialization bound
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Override the shutdown wait bound
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Install a handler for engine stderr lines
    pub fn stderr_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Arc::new(handler));
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let root = self.root.ok_or(ConfigError::MissingField("root"))?;
        if !root.exists() {
            return Err(ConfigError::RootNotFound(root));
        }

        Ok(SessionConfig {
            root,
            server_command: self
                .server_command
                .unwrap_or_else(|| DEFAULT_SERVER_COMMAND.to_string()),
            server_args: self.server_args,
            working_directory: self.working_directory,
            record_path: self.record_path,
            init_timeout: self
                .init_timeout
                .unwrap_or(Duration::from_millis(DEFAULT_INITIALIZATION_TIMEOUT_MS)),
            stop_timeout: self
                .stop_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS)),
            stderr_handler: self.stderr_handler,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
