//! Record File Source Port
//!
//! Opening a flat file and turning its rows into typed records. Row-level
//! problems surface per item so the caller can skip a bad line and keep
//! going; file-level problems surface from `open`.

use std::path::{Path, PathBuf};

/// A file that could not be opened or read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not read {}: {message}", path.display())]
pub struct FileAccessError {
    /// File that failed.
    pub path: PathBuf,
    /// I/O error details.
    pub message: String,
}

impl FileAccessError {
    /// Create a new file access error.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The date column is not `YYYY-MM-DD`.
    #[error("line {line}: invalid date '{value}'")]
    InvalidDate {
        /// 1-based line number in the file.
        line: u64,
        /// Offending date text.
        value: String,
        /// The raw row.
        raw: String,
    },

    /// Wrong column count or a non-numeric value.
    #[error("line {line}: malformed row: {message}")]
    Malformed {
        /// 1-based line number in the file.
        line: u64,
        /// Decoder error details.
        message: String,
        /// The raw row.
        raw: String,
    },
}

impl ParseError {
    /// Line the error was found on.
    #[must_use]
    pub const fn line(&self) -> u64 {
        match self {
            Self::InvalidDate { line, .. } | Self::Malformed { line, .. } => *line,
        }
    }

    /// Raw text of the offending row.
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::InvalidDate { raw, .. } | Self::Malformed { raw, .. } => raw,
        }
    }
}

/// Port for reading records of type `T` from files.
///
/// Implementations are blocking; callers run them off the async runtime.
pub trait RecordFileSource<T>: Send + Sync + 'static {
    /// Row iterator for one opened file.
    type Rows: Iterator<Item = Result<T, ParseError>> + Send;

    /// Open `path` and position after its header line.
    ///
    /// # Errors
    ///
    /// Returns [`FileAccessError`] if the file cannot be opened.
    fn open(&self, path: &Path) -> Result<Self::Rows, FileAccessError>;
}
