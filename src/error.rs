// ⚠️ Import error taxonomy
// Fatal errors abort a job before any record is produced, everything else is per-record

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type ImportResult<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ImportError {
    /// Source file does not exist (fatal)
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Source file exists but cannot be read or has the wrong shape (fatal)
    #[error("source file {} is unreadable: {reason}", .path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    /// Malformed columns or unparsable date on one line
    #[error("{reason}")]
    LineParse { line: usize, reason: String },

    /// Free-text service description with no canonical type
    #[error("unrecognized service type: '{0}'")]
    TypeMapping(String),

    /// Non-numeric or negative amount, non-positive pieces, empty sigla
    #[error("invalid value: {0}")]
    Validation(String),

    /// Storage lookup or write failed for one record
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded (fatal)
    #[error("configuration error: {0}")]
    Config(String),
}

impl ImportError {
    /// Whether this error aborts the whole job
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::SourceNotFound(_)
                | ImportError::SourceUnreadable { .. }
                | ImportError::Config(_)
        )
    }

    pub(crate) fn line(line: usize, reason: impl Into<String>) -> Self {
        ImportError::LineParse {
            line,
            reason: reason.into(),
        }
    }
}

/// A per-record failure, already formatted as `"Line N: ..."` / `"Row N: ..."`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line: usize,
    pub message: String,
}

impl LineError {
    pub fn new(unit: &str, line: usize, err: impl fmt::Display) -> Self {
        LineError {
            line,
            message: format!("{} {}: {}", unit, line, err),
        }
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<LineError> for String {
    fn from(err: LineError) -> Self {
        err.message
    }
}
