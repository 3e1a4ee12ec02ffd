use std::path::PathBuf;
use thiserror::Error;

/// Failure classes for a backup run.
///
/// Tier failures are ordinary values the fallback chain consumes; the CLI
/// maps whichever one survives the chain onto an exit code.
#[derive(Error, Debug)]
pub enum DuffelError {
    #[error("no files matched the extension allowlist under {}", .root.display())]
    SelectionEmpty { root: PathBuf },

    #[error("archiver `{program}` not found on PATH")]
    ToolMissing { program: String },

    #[error("archiver `{program}` exited with an error: {stderr}")]
    ToolFailed { program: String, stderr: String },

    #[error("no Python interpreter found (tried python3, python)")]
    InterpreterMissing,

    #[error("library `{library}` unavailable after install attempts")]
    LibraryUnavailable { library: String },

    #[error("library archive write failed: {stderr}")]
    LibraryFailed { stderr: String },

    #[error("bootstrap download failed: {0}")]
    Bootstrap(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DuffelError>;
