use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::data::ActiveSession;

/// Default file name of the breadcrumb inside the app data directory
pub const BREADCRUMB_FILE_NAME: &str = "active_session.json";

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid breadcrumb: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stores the crash-recovery breadcrumb for the active session.
///
/// Written after every change, read once at startup to offer resuming
/// the previous project.
#[derive(Debug, Clone)]
pub struct RecoveryStore {
    path: PathBuf,
}

impl RecoveryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, session: &ActiveSession) -> Result<(), RecoveryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        write_atomic(&self.path, json.as_bytes())?;
        Ok(())
    }

    /// Read the breadcrumb, `None` if there is no interrupted session
    pub fn load(&self) -> Result<Option<ActiveSession>, RecoveryError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn clear(&self) -> Result<(), RecoveryError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}
