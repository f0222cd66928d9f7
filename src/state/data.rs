//! Shared data structures for the session state
//!
//! These structs represent the data model that flows between
//! the ledger file, the session engine and whoever drives it.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format used for every timestamp written to disk
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Extension given to every captured photo
pub const PHOTO_EXTENSION: &str = "jpg";

/// Current local time truncated to whole seconds
pub fn now_seconds() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Represents a single logged photo (one ledger row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Capture instant, second precision
    #[serde(rename = "Timestamp", with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    /// Category folder under the project root (e.g. "HR")
    #[serde(rename = "Subfolder")]
    pub subfolder: String,
    /// Label typed by the operator (e.g. "John Doe")
    #[serde(rename = "Name")]
    pub display_name: String,
    /// File name on disk, `display_name.jpg` or a suffixed variant
    #[serde(rename = "Filename")]
    pub filename: String,
    /// Absolute path: project folder / subfolder / filename
    #[serde(rename = "File Path")]
    pub file_path: PathBuf,
}

impl PhotoRecord {
    pub fn new(
        timestamp: NaiveDateTime,
        subfolder: impl Into<String>,
        display_name: impl Into<String>,
        file_path: PathBuf,
    ) -> Self {
        let filename = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            timestamp,
            subfolder: subfolder.into(),
            display_name: display_name.into(),
            filename,
            file_path,
        }
    }

    /// Point the record at a new location, keeping the filename in sync
    pub fn relocate(&mut self, subfolder: &str, display_name: &str, file_path: PathBuf) {
        self.subfolder = subfolder.to_string();
        self.display_name = display_name.to_string();
        self.filename = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.file_path = file_path;
    }
}

/// A deleted photo parked in the trash, kept on the undo stack
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedPhoto {
    pub original_path: PathBuf,
    pub trash_path: PathBuf,
    pub record: PhotoRecord,
    /// Position the record had in the session before deletion
    pub index: usize,
}

/// Crash-recovery breadcrumb, stored outside the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub project_folder: PathBuf,
    pub photo_count: usize,
    #[serde(with = "timestamp_format")]
    pub last_activity: NaiveDateTime,
}

impl ActiveSession {
    pub fn now(project_folder: &Path, photo_count: usize) -> Self {
        Self {
            project_folder: project_folder.to_path_buf(),
            photo_count,
            last_activity: now_seconds(),
        }
    }
}

/// A capture held back because its target name is already taken.
///
/// Carries everything needed to re-submit the capture once the
/// operator has decided how to resolve the conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCapture {
    pub subfolder: String,
    pub display_name: String,
    pub existing_path: PathBuf,
    pub image: Vec<u8>,
}

/// How the operator resolved a pending duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateResolution {
    /// Park the existing file in the trash and take its name
    Replace,
    /// Save under the next free `_N` suffix
    KeepBoth,
}

/// Result of adding a photo
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Photo written and logged. `save_error` is set when the ledger
    /// could not be updated; the photo itself is safe on disk.
    Added {
        record: PhotoRecord,
        save_error: Option<String>,
    },
    /// Name already taken and the policy defers to the caller
    Duplicate(PendingCapture),
}

/// Result of renaming or moving a photo
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated {
        record: PhotoRecord,
        save_error: Option<String>,
    },
    Duplicate {
        existing_path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub record: PhotoRecord,
    /// False when the file was deleted permanently or was already gone
    pub undoable: bool,
    pub save_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndoOutcome {
    pub record: PhotoRecord,
    /// Position the record was reinserted at
    pub index: usize,
    pub save_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub count: usize,
}

/// Serde adapter for `NaiveDateTime` using [`TIMESTAMP_FORMAT`]
mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_time() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-03-01 09:30:15", TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn test_filename_follows_path() {
        let record = PhotoRecord::new(
            sample_time(),
            "HR",
            "John",
            PathBuf::from("/projects/acme/HR/John_2.jpg"),
        );
        assert_eq!(record.filename, "John_2.jpg");
    }

    #[test]
    fn test_relocate_updates_all_fields() {
        let mut record = PhotoRecord::new(
            sample_time(),
            "HR",
            "John",
            PathBuf::from("/projects/acme/HR/John.jpg"),
        );

        record.relocate("Sales", "Jane", PathBuf::from("/projects/acme/Sales/Jane.jpg"));

        assert_eq!(record.subfolder, "Sales");
        assert_eq!(record.display_name, "Jane");
        assert_eq!(record.filename, "Jane.jpg");
        assert_eq!(record.timestamp, sample_time());
    }

    #[test]
    fn test_breadcrumb_json_uses_second_precision() {
        let crumb = ActiveSession {
            project_folder: PathBuf::from("/projects/acme"),
            photo_count: 3,
            last_activity: sample_time(),
        };

        let json = serde_json::to_string(&crumb).unwrap();
        assert!(json.contains("\"last_activity\":\"2024-03-01 09:30:15\""));

        let restored: ActiveSession = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, crumb);
    }

    #[test]
    fn test_now_has_no_subsecond_part() {
        assert_eq!(now_seconds().nanosecond(), 0);
    }
}
