//! lsp-pipe - drive a language-analysis engine over stdio pipes
//!
//! Spawns an LSP-style engine as a child process, speaks the
//! `Content-Length`-framed JSON-RPC wire protocol over its stdin/stdout, and
//! exposes a thread-safe [`Session`] for document synchronization and
//! position queries. Wire traffic can optionally be captured to a binary log
//! for offline replay.
//!
//! ```no_run
//! use lsp_pipe::{Session, SessionConfig};
//!
//! # async fn run() -> Result<(), lsp_pipe::SessionError> {
//! let config = SessionConfig::builder()
//!     .root("/path/to/project")
//!     .server_command("clangd")
//!     .build()?;
//!
//! let session = Session::connect(config).await?;
//! session.open_file("/path/to/project/main.cpp".as_ref())?;
//! session.request_completion("/path/to/project/main.cpp".as_ref(), 10, 4, |reply| {
//!     println!("completion: {reply}");
//! })?;
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod config;
pub mod dispatch;
pub mod documents;
pub mod framing;
pub mod process;
pub mod protocol;
pub mod recorder;
pub mod session;

#[cfg(test)]
mod test_utils;

pub use capabilities::{Capabilities, SemanticTokensLegend};
pub use config::{ConfigError, SessionConfig, SessionConfigBuilder};
pub use documents::{Document, DocumentError, DocumentStore};
pub use framing::{FrameDecoder, FramingError};
pub use process::{ChildProcess, ProcessError, ProcessState};
pub use protocol::OutboundMessage;
pub use recorder::{WireDirection, WireLog, WireLogReader, WireRecord};
pub use session::{Session, SessionError, SessionState};
