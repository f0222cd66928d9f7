use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::error::TrashError;

/// Default name of the trash directory inside the app data directory
pub const TRASH_DIR_NAME: &str = "Trash";

/// A flat holding area for soft-deleted photos.
///
/// Files are parked by name only; no subfolders are mirrored. A name
/// that is already taken gets a `_N` suffix before the extension.
#[derive(Debug, Clone)]
pub struct TrashManager {
    dir: PathBuf,
}

impl TrashManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move a file into the trash and return where it landed.
    ///
    /// On failure the original may still be in place.
    pub fn move_to_trash(&self, path: &Path) -> Result<PathBuf, TrashError> {
        fs::create_dir_all(&self.dir).map_err(|source| TrashError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let trash_path = self.free_slot(path);
        move_file(path, &trash_path).map_err(|source| TrashError::Move {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!("Trashed {} -> {}", path.display(), trash_path.display());
        Ok(trash_path)
    }

    /// Move a parked file back to where it came from
    pub fn restore(&self, trash_path: &Path, original_path: &Path) -> Result<(), TrashError> {
        if !trash_path.exists() {
            return Err(TrashError::NotFound(trash_path.to_path_buf()));
        }
        if original_path.exists() {
            return Err(TrashError::Occupied(original_path.to_path_buf()));
        }

        if let Some(parent) = original_path.parent() {
            fs::create_dir_all(parent).map_err(|source| TrashError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        move_file(trash_path, original_path).map_err(|source| TrashError::Io {
            path: original_path.to_path_buf(),
            source,
        })?;

        tracing::debug!("Restored {}", original_path.display());
        Ok(())
    }

    /// Permanently remove one parked file. Already gone is fine.
    pub fn purge(&self, trash_path: &Path) -> Result<(), TrashError> {
        match fs::remove_file(trash_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TrashError::Io {
                path: trash_path.to_path_buf(),
                source,
            }),
        }
    }

    /// Delete every file currently in the trash.
    ///
    /// Best effort: failures are logged and skipped. Returns how many
    /// files were removed.
    pub fn purge_all(&self) -> usize {
        let mut removed = 0;
        for path in self.entries() {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => tracing::warn!("Error deleting {}: {err}", path.display()),
            }
        }

        if removed > 0 {
            tracing::info!("Emptied trash: {removed} file(s) removed");
        }
        removed
    }

    /// Files currently parked in the trash, sorted by path
    pub fn entries(&self) -> Vec<PathBuf> {
        if !self.dir.exists() {
            return Vec::new();
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    /// First free name in the trash for the given file
    fn free_slot(&self, path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let mut candidate = self.dir.join(&file_name);

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut counter = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{stem}_{counter}{extension}"));
            counter += 1;
        }
        candidate
    }
}

/// Move a file, falling back to copy and remove when a plain rename
/// fails (e.g. across devices).
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.is_file() {
                return Err(rename_err);
            }
            if let Err(copy_err) = fs::copy(from, to) {
                let _ = fs::remove_file(to);
                tracing::debug!("Copy fallback failed: {copy_err}");
                return Err(rename_err);
            }
            if let Err(remove_err) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(remove_err);
            }
            Ok(())
        }
    }
}
