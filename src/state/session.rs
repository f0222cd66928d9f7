use image::{DynamicImage, ImageError, ImageFormat};
use std::collections::{BTreeSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::data::{
    now_seconds, ActiveSession, AddOutcome, DeleteOutcome, DeletedPhoto, DuplicateResolution,
    ExportOutcome, PendingCapture, PhotoRecord, UndoOutcome, UpdateOutcome, PHOTO_EXTENSION,
};
use super::error::{LedgerError, SessionError};
use super::ledger::LedgerStore;
use super::recovery::RecoveryStore;
use super::trash::{move_file, TrashManager};
use super::writer::{LedgerJob, LedgerWriter};
use crate::capture::{capture_with_retry, FrameSource, DEFAULT_CAPTURE_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::config::{AppPaths, DuplicatePolicy, SessionOptions, SettingsBag};

/// The active working set for one project.
///
/// Owns the ordered photo list and keeps the project folder, the trash
/// and the ledger in step with it. Every mutation either appends one
/// ledger row, rewrites the whole ledger, or fails before memory is
/// touched. The one exception is a capture whose ledger append fails:
/// the photo is on disk, so the record is kept and the failure is
/// reported through `save_error`.
pub struct PhotoSession<S: SettingsBag> {
    settings: S,
    project_folder: PathBuf,
    photos: Vec<PhotoRecord>,
    /// Most recent deletion at the back
    deleted_photos: VecDeque<DeletedPhoto>,
    /// Mutations whose ledger write failed since the last full save.
    /// While non-zero, appends are promoted to full rewrites.
    pending_saves: usize,
    ledger: LedgerStore,
    /// When attached, persistence is queued here instead of written inline
    writer: Option<LedgerWriter>,
    /// Jobs queued on the writer since the last flush
    queued_saves: usize,
    trash: TrashManager,
    recovery: RecoveryStore,
}

impl<S: SettingsBag> PhotoSession<S> {
    /// Create an empty session. Use [`PhotoSession::open`] to pick up
    /// rows already in the ledger.
    pub fn new(
        project_folder: impl Into<PathBuf>,
        settings: S,
        ledger: LedgerStore,
        trash: TrashManager,
        recovery: RecoveryStore,
    ) -> Self {
        Self {
            settings,
            project_folder: project_folder.into(),
            photos: Vec::new(),
            deleted_photos: VecDeque::new(),
            pending_saves: 0,
            ledger,
            writer: None,
            queued_saves: 0,
            trash,
            recovery,
        }
    }

    /// Create a session and load the existing ledger (or start a new one)
    pub fn open(
        project_folder: impl Into<PathBuf>,
        settings: S,
        ledger: LedgerStore,
        trash: TrashManager,
        recovery: RecoveryStore,
    ) -> Self {
        let mut session = Self::new(project_folder, settings, ledger, trash, recovery);
        session.reload();
        session
    }

    /// Open a session using the standard file layout under `paths`
    pub fn open_in(project_folder: impl Into<PathBuf>, settings: S, paths: &AppPaths) -> Self {
        Self::open(
            project_folder,
            settings,
            LedgerStore::new(paths.ledger_file()),
            TrashManager::new(paths.trash_dir()),
            RecoveryStore::new(paths.breadcrumb_file()),
        )
    }

    /// Replace the in-memory list with whatever the ledger holds
    pub fn reload(&mut self) {
        self.photos = self.ledger.load();
        self.pending_saves = 0;
        tracing::info!(
            "Session for {} has {} photo(s)",
            self.project_folder.display(),
            self.photos.len()
        );
    }

    // ========== Queries ==========

    pub fn settings_mut(&mut self) -> &mut S {
        &mut self.settings
    }

    pub fn options(&self) -> SessionOptions {
        SessionOptions::from_settings(&self.settings)
    }

    pub fn project_folder(&self) -> &Path {
        &self.project_folder
    }

    pub fn photos(&self) -> &[PhotoRecord] {
        &self.photos
    }

    pub fn photo(&self, index: usize) -> Option<&PhotoRecord> {
        self.photos.get(index)
    }

    pub fn photo_count(&self) -> usize {
        self.photos.len()
    }

    /// Unique subfolders used in this session, sorted
    pub fn subfolders(&self) -> Vec<String> {
        self.photos
            .iter()
            .map(|p| p.subfolder.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of deletions that can still be undone
    pub fn undo_depth(&self) -> usize {
        self.deleted_photos.len()
    }

    pub fn pending_saves(&self) -> usize {
        self.pending_saves
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    // ========== Background persistence ==========

    /// Route ledger writes through `writer`.
    ///
    /// Outcomes then carry no `save_error`; failures surface from
    /// [`PhotoSession::flush_ledger`] instead.
    pub fn attach_writer(&mut self, writer: LedgerWriter) {
        self.writer = Some(writer);
        self.queued_saves = 0;
    }

    /// Wait for queued ledger writes and fold the result into
    /// `pending_saves`. Returns the failure message, if any.
    pub async fn flush_ledger(&mut self) -> Option<String> {
        let writer = self.writer.as_ref()?;
        if self.queued_saves == 0 {
            return None;
        }
        let error = writer.flush().await;
        let queued = std::mem::take(&mut self.queued_saves);
        match &error {
            Some(message) => {
                tracing::warn!("Background ledger save failed: {message}");
                self.pending_saves += queued;
            }
            None => self.pending_saves = 0,
        }
        error
    }

    /// Flush and stop the attached writer, going back to inline saves
    pub async fn detach_writer(&mut self) -> Option<String> {
        let error = self.flush_ledger().await;
        if let Some(writer) = self.writer.take() {
            writer.shutdown().await;
        }
        error
    }

    // ========== Capture ==========

    /// Save a captured image under `subfolder/display_name.jpg` and log it,
    /// resolving name collisions with the configured policy.
    pub fn add_photo(
        &mut self,
        subfolder: &str,
        display_name: &str,
        image_bytes: &[u8],
    ) -> Result<AddOutcome, SessionError> {
        let policy = self.options().duplicate_handling;
        self.add_photo_with(subfolder, display_name, image_bytes, policy)
    }

    /// Like [`PhotoSession::add_photo`] with an explicit duplicate policy
    pub fn add_photo_with(
        &mut self,
        subfolder: &str,
        display_name: &str,
        image_bytes: &[u8],
        policy: DuplicatePolicy,
    ) -> Result<AddOutcome, SessionError> {
        let subfolder = validated("subfolder", subfolder)?;
        let display_name = validated("name", display_name)?;
        let image = image::load_from_memory(image_bytes)?;
        let timestamp = now_seconds();

        let folder = self.ensure_subfolder(&subfolder)?;
        let mut file_path = folder.join(photo_file_name(&display_name));
        let mut replaced = None;

        if file_path.exists() {
            match policy {
                DuplicatePolicy::Ask => {
                    tracing::info!("{} already exists, deferring to caller", file_path.display());
                    return Ok(AddOutcome::Duplicate(PendingCapture {
                        subfolder,
                        display_name,
                        existing_path: file_path,
                        image: image_bytes.to_vec(),
                    }));
                }
                DuplicatePolicy::AutoIncrement => {
                    file_path = next_free_path(&folder, &display_name, None);
                }
                DuplicatePolicy::Replace => {
                    replaced = Some(self.trash.move_to_trash(&file_path)?);
                }
            }
        }

        if let Err(err) = write_jpeg(&file_path, &image) {
            if let Some(trash_path) = &replaced {
                self.put_back(trash_path, &file_path);
            }
            return Err(err);
        }

        let record = PhotoRecord::new(timestamp, subfolder, display_name, file_path);
        let job = if replaced.is_some() {
            self.drop_records_at(&record.file_path, None);
            self.photos.push(record.clone());
            LedgerJob::Rewrite(self.photos.clone())
        } else {
            self.photos.push(record.clone());
            LedgerJob::Append(record.clone())
        };
        let save_error = self.persist(job);
        self.save_breadcrumb();

        tracing::info!("Captured {}", record.file_path.display());
        Ok(AddOutcome::Added { record, save_error })
    }

    /// Re-submit a capture held back by the `ask` policy
    pub fn resolve_duplicate(
        &mut self,
        pending: PendingCapture,
        resolution: DuplicateResolution,
    ) -> Result<AddOutcome, SessionError> {
        let policy = match resolution {
            DuplicateResolution::Replace => DuplicatePolicy::Replace,
            DuplicateResolution::KeepBoth => DuplicatePolicy::AutoIncrement,
        };
        self.add_photo_with(&pending.subfolder, &pending.display_name, &pending.image, policy)
    }

    /// Pull a frame from `source` and add it.
    ///
    /// Inputs are checked before the camera is touched.
    pub fn capture_photo(
        &mut self,
        source: &mut dyn FrameSource,
        subfolder: &str,
        display_name: &str,
    ) -> Result<AddOutcome, SessionError> {
        validated("subfolder", subfolder)?;
        validated("name", display_name)?;
        let frame = capture_with_retry(source, DEFAULT_CAPTURE_ATTEMPTS, DEFAULT_RETRY_DELAY)?;
        self.add_photo(subfolder, display_name, &frame)
    }

    // ========== Edit ==========

    /// Rename and/or move the photo at `index`
    pub fn update_photo(
        &mut self,
        index: usize,
        new_subfolder: &str,
        new_name: &str,
    ) -> Result<UpdateOutcome, SessionError> {
        let policy = self.options().duplicate_handling;
        self.update_photo_with(index, new_subfolder, new_name, policy)
    }

    /// Like [`PhotoSession::update_photo`] with an explicit duplicate policy
    pub fn update_photo_with(
        &mut self,
        index: usize,
        new_subfolder: &str,
        new_name: &str,
        policy: DuplicatePolicy,
    ) -> Result<UpdateOutcome, SessionError> {
        self.check_index(index)?;
        let subfolder = validated("subfolder", new_subfolder)?;
        let display_name = validated("name", new_name)?;

        let old_path = self.photos[index].file_path.clone();
        if !old_path.exists() {
            return Err(SessionError::NotFound(old_path));
        }

        let folder = self.project_folder.join(&subfolder);
        let mut new_path = folder.join(photo_file_name(&display_name));
        let mut replaced = None;

        if new_path != old_path && new_path.exists() {
            match policy {
                DuplicatePolicy::Ask => {
                    return Ok(UpdateOutcome::Duplicate {
                        existing_path: new_path,
                    });
                }
                DuplicatePolicy::AutoIncrement => {
                    new_path = next_free_path(&folder, &display_name, Some(&old_path));
                }
                DuplicatePolicy::Replace => {
                    replaced = Some(self.trash.move_to_trash(&new_path)?);
                }
            }
        }

        if new_path != old_path {
            if let Err(err) = self.ensure_subfolder(&subfolder) {
                if let Some(trash_path) = &replaced {
                    self.put_back(trash_path, &new_path);
                }
                return Err(err);
            }
            if let Err(source) = move_file(&old_path, &new_path) {
                if let Some(trash_path) = &replaced {
                    self.put_back(trash_path, &new_path);
                }
                return Err(SessionError::io(
                    format!("cannot move {}", old_path.display()),
                    source,
                ));
            }
        }

        let index = if replaced.is_some() {
            self.drop_records_at(&new_path, Some(index)).unwrap_or(index)
        } else {
            index
        };
        self.photos[index].relocate(&subfolder, &display_name, new_path);
        let record = self.photos[index].clone();

        let save_error = self.persist(LedgerJob::Rewrite(self.photos.clone()));
        self.save_breadcrumb();

        tracing::info!("Updated photo {index}: {}", record.file_path.display());
        Ok(UpdateOutcome::Updated { record, save_error })
    }

    // ========== Delete / undo ==========

    /// Remove the photo at `index`, parking its file in the trash when
    /// `use_trash` is on.
    pub fn delete_photo(&mut self, index: usize) -> Result<DeleteOutcome, SessionError> {
        self.check_index(index)?;
        let options = self.options();
        let file_path = self.photos[index].file_path.clone();
        let mut undoable = false;

        if file_path.exists() {
            if options.use_trash {
                let trash_path = self.trash.move_to_trash(&file_path)?;
                self.deleted_photos.push_back(DeletedPhoto {
                    original_path: file_path,
                    trash_path,
                    record: self.photos[index].clone(),
                    index,
                });
                self.enforce_undo_limit(options.undo_delete_limit);
                undoable = options.undo_delete_limit > 0;
            } else {
                fs::remove_file(&file_path).map_err(|e| {
                    SessionError::io(format!("cannot delete {}", file_path.display()), e)
                })?;
            }
        } else {
            tracing::warn!("{} is already gone, dropping record", file_path.display());
        }

        let record = self.photos.remove(index);
        let save_error = self.persist(LedgerJob::Rewrite(self.photos.clone()));
        self.save_breadcrumb();

        tracing::info!("Deleted photo {index}: {}", record.filename);
        Ok(DeleteOutcome {
            record,
            undoable,
            save_error,
        })
    }

    /// Bring back the most recent deletion at its old position
    pub fn undo_delete(&mut self) -> Result<UndoOutcome, SessionError> {
        let entry = self
            .deleted_photos
            .pop_back()
            .ok_or(SessionError::NothingToUndo)?;

        if !entry.trash_path.exists() {
            return Err(SessionError::TrashFileMissing(entry.trash_path));
        }

        let restored = self.trash.restore(&entry.trash_path, &entry.original_path);
        if let Err(err) = restored {
            let err = SessionError::from(err);
            if !matches!(err, SessionError::TrashFileMissing(_)) {
                // Still parked; leave it undoable
                self.deleted_photos.push_back(entry);
            }
            return Err(err);
        }

        let index = entry.index.min(self.photos.len());
        self.photos.insert(index, entry.record.clone());
        let save_error = self.persist(LedgerJob::Rewrite(self.photos.clone()));
        self.save_breadcrumb();

        tracing::info!("Restored {} at {index}", entry.original_path.display());
        Ok(UndoOutcome {
            record: entry.record,
            index,
            save_error,
        })
    }

    // ========== Session ==========

    /// Write the current in-memory list to `destination`
    pub fn export_report(&self, destination: &Path) -> Result<ExportOutcome, SessionError> {
        if self.photos.is_empty() {
            return Err(SessionError::NoData);
        }

        LedgerStore::write_to(destination, &self.photos)?;

        tracing::info!(
            "Exported {} photo(s) to {}",
            self.photos.len(),
            destination.display()
        );
        Ok(ExportOutcome {
            path: destination.to_path_buf(),
            count: self.photos.len(),
        })
    }

    /// Clear the ledger, undo history and breadcrumb; empty the trash if
    /// configured. Photos under the project folder are left alone.
    pub fn end_session(&mut self) -> Result<(), SessionError> {
        self.ledger.initialize()?;

        if self.options().auto_empty_trash {
            self.trash.purge_all();
        }

        self.photos.clear();
        self.deleted_photos.clear();
        self.pending_saves = 0;

        if let Err(err) = self.recovery.clear() {
            tracing::warn!("Error clearing session breadcrumb: {err}");
        }

        tracing::info!("Session ended for {}", self.project_folder.display());
        Ok(())
    }

    /// Rewrite the ledger from memory, e.g. after a failed save.
    /// Writes inline; flush an attached writer first.
    pub fn sync_ledger(&mut self) -> Result<(), SessionError> {
        self.ledger.rewrite(&self.photos)?;
        self.pending_saves = 0;
        Ok(())
    }

    // ========== Internals ==========

    fn check_index(&self, index: usize) -> Result<(), SessionError> {
        if index < self.photos.len() {
            Ok(())
        } else {
            Err(SessionError::Validation(format!(
                "invalid photo index {index} (session has {})",
                self.photos.len()
            )))
        }
    }

    fn ensure_subfolder(&self, subfolder: &str) -> Result<PathBuf, SessionError> {
        let folder = self.project_folder.join(subfolder);
        fs::create_dir_all(&folder).map_err(|e| {
            SessionError::io(format!("cannot create subfolder {}", folder.display()), e)
        })?;
        Ok(folder)
    }

    /// Drop records pointing at `path`, except the one at `keep`.
    /// Returns the adjusted position of `keep`.
    fn drop_records_at(&mut self, path: &Path, mut keep: Option<usize>) -> Option<usize> {
        let mut i = 0;
        while i < self.photos.len() {
            if Some(i) != keep && self.photos[i].file_path == path {
                self.photos.remove(i);
                keep = keep.map(|k| if i < k { k - 1 } else { k });
            } else {
                i += 1;
            }
        }
        keep
    }

    fn enforce_undo_limit(&mut self, limit: usize) {
        while self.deleted_photos.len() > limit {
            let Some(oldest) = self.deleted_photos.pop_front() else {
                break;
            };
            match self.trash.purge(&oldest.trash_path) {
                Ok(()) => tracing::debug!("Purged {}", oldest.trash_path.display()),
                Err(err) => tracing::warn!("Error purging old undo entry: {err}"),
            }
        }
    }

    /// Roll back a replace after the new file could not be placed
    fn put_back(&self, trash_path: &Path, original_path: &Path) {
        if let Err(err) = self.trash.restore(trash_path, original_path) {
            tracing::warn!(
                "Could not restore {} after failed write: {err}",
                original_path.display()
            );
        }
    }

    /// Hand a job to the writer, or write it now.
    ///
    /// An append only adds one row to whatever the file holds, so after
    /// a failed save it is promoted to a rewrite to catch the ledger up.
    fn persist(&mut self, job: LedgerJob) -> Option<String> {
        let job = match job {
            LedgerJob::Append(_) if self.pending_saves > 0 => {
                tracing::info!("Ledger is behind by {} change(s), rewriting", self.pending_saves);
                LedgerJob::Rewrite(self.photos.clone())
            }
            job => job,
        };

        if let Some(writer) = &self.writer {
            if writer.submit(job.clone()) {
                self.queued_saves += 1;
                return None;
            }
            tracing::warn!("Ledger writer has stopped, saving inline");
            self.writer = None;
        }

        let result = match &job {
            LedgerJob::Append(record) => self.ledger.append(record),
            LedgerJob::Rewrite(records) => self.ledger.rewrite(records),
        };
        self.persisted(result)
    }

    fn persisted(&mut self, result: Result<(), LedgerError>) -> Option<String> {
        match result {
            Ok(()) => {
                self.pending_saves = 0;
                None
            }
            Err(err) => {
                self.pending_saves += 1;
                tracing::warn!("Ledger save failed: {err}");
                Some(err.user_message())
            }
        }
    }

    fn save_breadcrumb(&self) {
        let crumb = ActiveSession::now(&self.project_folder, self.photos.len());
        if let Err(err) = self.recovery.save(&crumb) {
            tracing::warn!("Error saving session breadcrumb: {err}");
        }
    }
}

impl<S: SettingsBag> std::fmt::Debug for PhotoSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoSession")
            .field("project_folder", &self.project_folder)
            .field("photos", &self.photos.len())
            .field("undo_depth", &self.deleted_photos.len())
            .field("ledger", &self.ledger)
            .finish()
    }
}

/// Trimmed, non-empty, and a single path component
fn validated(field: &str, value: &str) -> Result<String, SessionError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SessionError::Validation(format!("{field} must not be empty")));
    }
    if value.contains(|c: char| c == '/' || c == '\\') || value == "." || value == ".." {
        return Err(SessionError::Validation(format!(
            "{field} must be a plain name, got {value:?}"
        )));
    }
    Ok(value.to_string())
}

fn photo_file_name(display_name: &str) -> String {
    format!("{display_name}.{PHOTO_EXTENSION}")
}

/// First `name_N.jpg` (N from 2) in `folder` that is free. `allow` is
/// treated as free so a photo can keep its own name.
fn next_free_path(folder: &Path, display_name: &str, allow: Option<&Path>) -> PathBuf {
    let mut counter = 2;
    loop {
        let candidate = folder.join(format!("{display_name}_{counter}.{PHOTO_EXTENSION}"));
        if !candidate.exists() || allow == Some(candidate.as_path()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Encode as baseline JPEG, removing the partial file on failure
fn write_jpeg(path: &Path, image: &DynamicImage) -> Result<(), SessionError> {
    let context = || format!("cannot save photo {}", path.display());

    let file = File::create(path).map_err(|e| SessionError::io(context(), e))?;
    let mut writer = BufWriter::new(file);
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());

    let result = rgb
        .write_to(&mut writer, ImageFormat::Jpeg)
        .and_then(|()| writer.flush().map_err(ImageError::IoError));

    if let Err(err) = result {
        drop(writer);
        let _ = fs::remove_file(path);
        return Err(match err {
            ImageError::IoError(source) => SessionError::io(context(), source),
            other => SessionError::Image(other),
        });
    }
    Ok(())
}
