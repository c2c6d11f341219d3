//! Document store
//!
//! Client-side mirrors of open files. The store is the single owner of file
//! text: every message builder that references a path goes through it, and
//! entries are created lazily on first use. Versions start at 1 and strictly
//! increase on every accepted mutation.

use lsp_types::{Position, Range, Uri};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ============================================================================
// Document Errors
// ============================================================================

/// Document store errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("Line {row} out of range (document has {line_count} lines)")]
    LineOutOfRange { row: usize, line_count: usize },
}

// ============================================================================
// Document
// ============================================================================

/// A single-line incremental edit, ready to be turned into a ranged change
/// notification
#[derive(Debug, Clone, PartialEq)]
pub struct LineEdit {
    /// Document version after the edit
    pub version: i32,

    /// Replaced region: `[row, 0)` to `[row + 1, 0)`
    pub range: Range,

    /// Replacement text, newline-terminated
    pub text: String,
}

/// Client-side mirror of one open source file
#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    uri: Uri,
    version: i32,
    lines: Vec<String>,
}

impl Document {
    /// Read a document from disk at version 1
    fn from_disk(path: PathBuf) -> Result<Self, DocumentError> {
        let content = std::fs::read_to_string(&path)?;
        let uri = path_uri(&path)?;

        Ok(Self {
            path,
            uri,
            version: 1,
            lines: content.lines().map(str::to_string).collect(),
        })
    }

    /// Absolute path of the mirrored file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `file://` URI of the mirrored file
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Current document version
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Number of lines currently held
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// LSP language id derived from the file extension
    pub fn language_id(&self) -> &'static str {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("c") => "c",
            Some("cpp") | Some("cc") | Some("cxx") | Some("c++") => "cpp",
            Some("h") | Some("hpp") | Some("hh") | Some("hxx") | Some("h++") => "cpp",
            Some("rs") => "rust",
            Some("py") => "python",
            _ => "plaintext",
        }
    }

    /// Reassemble the full document text
    pub fn text(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    /// Replace the entire content, bumping the version.
    ///
    /// Always an accepted mutation, even if the new text equals the old.
    /// Returns the new version.
    pub fn replace_all(&mut self, content: &str) -> i32 {
        self.lines = content.lines().map(str::to_string).collect();
        self.version += 1;
        self.version
    }

    /// Replace a single line, bumping the version.
    ///
    /// Out-of-range rows fail without mutating anything. Replacing a line
    /// with identical text is a no-op: no version bump, `Ok(None)`.
    pub fn replace_line(&mut self, row: usize, text: &str) -> Result<Option<LineEdit>, DocumentError> {
        let line_count = self.lines.len();
        if row >= line_count {
            return Err(DocumentError::LineOutOfRange { row, line_count });
        }

        if self.lines[row] == text {
            debug!("Line {} of {} unchanged, skipping edit", row, self.path.display());
            return Ok(None);
        }

        self.lines[row] = text.to_string();
        self.version += 1;

        Ok(Some(LineEdit {
            version: self.version,
            range: Range {
                start: Position {
                    line: row as u32,
                    character: 0,
                },
                end: Position {
                    line: row as u32 + 1,
                    character: 0,
                },
            },
            text: format!("{text}\n"),
        }))
    }
}

// ============================================================================
// Document Store
// ============================================================================

/// Shared handle to an open document
pub type SharedDocument = Arc<Mutex<Document>>;

/// Registry of open-file state, keyed by normalized absolute path
///
/// Only the find-or-create path is guarded by the registry lock; content
/// mutation happens under each document's own lock and is assumed
/// single-threaded per document.
#[derive(Debug, Default)]
pub struct DocumentStore {
    files: Mutex<HashMap<PathBuf, SharedDocument>>,
}

impl DocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or create the document for `path`.
    ///
    /// Idempotent: an already-tracked path returns the existing entry without
    /// re-reading the file. The boolean is true when the entry was freshly
    /// created from disk.
    pub fn open(&self, path: &Path) -> Result<(SharedDocument, bool), DocumentError> {
        let abs_path = normalize(path)?;

        let mut files = self.files.lock().unwrap();
        if let Some(document) = files.get(&abs_path) {
            debug!("Document {} already tracked", abs_path.display());
            return Ok((Arc::clone(document), false));
        }

        let document = Arc::new(Mutex::new(Document::from_disk(abs_path.clone())?));
        files.insert(abs_path, Arc::clone(&document));
        Ok((document, true))
    }

    /// Remove `path` from the open set, returning the entry if it was
    /// tracked. A later open re-reads from disk with a fresh version
    /// sequence.
    pub fn close(&self, path: &Path) -> Option<SharedDocument> {
        let abs_path = normalize(path).ok()?;
        self.files.lock().unwrap().remove(&abs_path)
    }

    /// Check whether a path is currently tracked
    pub fn is_open(&self, path: &Path) -> bool {
        match normalize(path) {
            Ok(abs_path) => self.files.lock().unwrap().contains_key(&abs_path),
            Err(_) => false,
        }
    }

    /// Number of currently tracked documents
    pub fn open_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

fn normalize(path: &Path) -> Result<PathBuf, DocumentError> {
    path.canonicalize()
        .map_err(|e| DocumentError::InvalidPath(format!("{}: {}", path.display(), e)))
}

fn path_uri(path: &Path) -> Result<Uri, DocumentError> {
    format!("file://{}", path.display())
        .parse()
        .map_err(|_| DocumentError::InvalidPath(format!("{} is not a valid URI", path.display())))
}

// ============================================================================
// Tests
// ============================================================================
