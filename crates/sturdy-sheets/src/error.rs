//! Error types for sturdy-sheets

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while acquiring, editing, saving or releasing workbooks.
///
/// Every variant that concerns a file names it, since callers usually juggle
/// several workbooks with the same name in different directories.
#[derive(Debug, Error)]
pub enum Error {
    /// An empty path was supplied
    #[error("File name not given")]
    FileNameNotGiven,

    /// The path does not exist and creation was not requested
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The path names a directory
    #[error("Path is a directory, not a workbook: {}", .0.display())]
    FileIsDirectory(PathBuf),

    /// The workbook has unsaved changes and the policy was to raise
    #[error("Workbook has unsaved changes: {}", .0.display())]
    WorkbookNotSaved(PathBuf),

    /// Another workbook with the same file name is open in the target instance
    #[error(
        "Cannot open {}: blocked by the open workbook {} which has the same name",
        .requested.display(),
        .blocking.display()
    )]
    WorkbookBlocked {
        requested: PathBuf,
        blocking: PathBuf,
    },

    /// A save-as target exists and overwriting was not requested
    #[error("File already exists: {}", .0.display())]
    FileAlreadyExists(PathBuf),

    /// Unknown option key, unknown policy token, or an unsupported combination
    #[error("Invalid option: {0}")]
    OptionInvalid(String),

    /// An instance or workbook handle no longer refers to a live object
    #[error("Object not alive: {0}")]
    ObjectNotAlive(String),

    /// Row or column index outside the 1-based grid
    #[error("Invalid cell index: row {row}, column {col} (rows and columns start at 1)")]
    InvalidCellIndex { row: u32, col: u32 },

    /// Failure reported by the automation layer
    #[error("Automation error: {0}")]
    Automation(String),

    /// A workbook file could not be decoded by the memory host
    #[error("Invalid workbook file {}: {source}", .path.display())]
    WorkbookFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an automation error with a message
    pub fn automation<S: Into<String>>(msg: S) -> Self {
        Error::Automation(msg.into())
    }

    /// Create an invalid-option error with a message
    pub fn option<S: Into<String>>(msg: S) -> Self {
        Error::OptionInvalid(msg.into())
    }
}
