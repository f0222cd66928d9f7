//! Error types for the session engine and its stores

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::capture::CaptureError;

/// Errors raised by the ledger file
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The file is held open by another application (usually a spreadsheet)
    #[error("ledger file is open in another application: {}", .0.display())]
    FileLocked(PathBuf),
    #[error("ledger I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger format error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("unexpected ledger columns in {}: {found}", path.display())]
    Schema { path: PathBuf, found: String },
}

impl LedgerError {
    /// Classify an I/O failure, separating lock violations from the rest
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if is_lock_violation(&source) {
            LedgerError::FileLocked(path)
        } else {
            LedgerError::Io { path, source }
        }
    }

    pub fn from_csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        let path = path.into();
        if !source.is_io_error() {
            return LedgerError::Csv { path, source };
        }
        match source.into_kind() {
            csv::ErrorKind::Io(err) => Self::from_io(path, err),
            other => LedgerError::Io {
                path,
                source: io::Error::new(io::ErrorKind::Other, format!("{other:?}")),
            },
        }
    }

    /// Message shown to the operator when a save fails
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::FileLocked(_) => {
                "Ledger file is open in another application. Please close it to save data."
                    .to_string()
            }
            other => format!("Error saving ledger: {other}"),
        }
    }
}

/// Spreadsheet apps lock files; Windows reports this as a sharing or
/// lock violation, everything else as permission denied.
fn is_lock_violation(err: &io::Error) -> bool {
    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    cfg!(windows)
        && matches!(
            err.raw_os_error(),
            Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
        )
}

/// Errors raised by the trash directory
#[derive(Debug, Error)]
pub enum TrashError {
    #[error("cannot move {} to trash: {source}", path.display())]
    Move {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("trashed file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("cannot restore over existing file: {}", .0.display())]
    Occupied(PathBuf),
    #[error("trash I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Rejected input; nothing was touched
    #[error("{0}")]
    Validation(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    /// Surfaced as-is so the operator can be told to close the file
    #[error("file is open in another application: {}", .0.display())]
    FileLocked(PathBuf),
    #[error("photo file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("no deletions to undo")]
    NothingToUndo,
    #[error("deleted file not found in trash: {}", .0.display())]
    TrashFileMissing(PathBuf),
    #[error("no photos to export")]
    NoData,
    #[error("invalid image data: {0}")]
    Image(#[from] image::ImageError),
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Ledger(LedgerError),
}

impl SessionError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        SessionError::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<LedgerError> for SessionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::FileLocked(path) => SessionError::FileLocked(path),
            other => SessionError::Ledger(other),
        }
    }
}

impl From<TrashError> for SessionError {
    fn from(err: TrashError) -> Self {
        match err {
            TrashError::NotFound(path) => SessionError::TrashFileMissing(path),
            TrashError::Occupied(path) => SessionError::io(
                format!("cannot restore {}", path.display()),
                io::Error::new(io::ErrorKind::AlreadyExists, "a file already exists at that path"),
            ),
            TrashError::Move { path, source } => {
                SessionError::io(format!("cannot move {} to trash", path.display()), source)
            }
            TrashError::Io { path, source } => {
                SessionError::io(format!("trash error on {}", path.display()), source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_locked() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "in use");
        let classified = LedgerError::from_io("/tmp/ledger.csv", err);
        assert!(matches!(classified, LedgerError::FileLocked(_)));
    }

    #[test]
    fn test_other_io_errors_stay_io() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let classified = LedgerError::from_io("/tmp/ledger.csv", err);
        assert!(matches!(classified, LedgerError::Io { .. }));
    }

    #[test]
    fn test_locked_ledger_maps_to_session_file_locked() {
        let err = SessionError::from(LedgerError::FileLocked(PathBuf::from("/tmp/ledger.csv")));
        assert!(matches!(err, SessionError::FileLocked(_)));
    }

    #[test]
    fn test_locked_message_asks_to_close_file() {
        let msg = LedgerError::FileLocked(PathBuf::from("x.csv")).user_message();
        assert!(msg.contains("close it"));
    }
}
