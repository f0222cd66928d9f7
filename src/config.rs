//! Settings and application paths
//!
//! The session engine only ever reads named keys from a [`SettingsBag`].
//! [`Config`] is the file-backed bag used by the application; tests and
//! embedders can use a plain `serde_json::Map`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::state::ledger::LEDGER_FILE_NAME;
use crate::state::recovery::BREADCRUMB_FILE_NAME;
use crate::state::trash::TRASH_DIR_NAME;

pub const KEY_DUPLICATE_HANDLING: &str = "duplicate_handling";
pub const KEY_USE_TRASH: &str = "use_trash";
pub const KEY_AUTO_EMPTY_TRASH: &str = "auto_empty_trash";
pub const KEY_UNDO_DELETE_LIMIT: &str = "undo_delete_limit";
pub const KEY_LAST_PROJECT: &str = "last_project";
pub const KEY_RECENT_PROJECTS: &str = "recent_projects";
pub const KEY_CAMERA_INDEX: &str = "camera_index";

/// Number of projects remembered in `recent_projects`
pub const MAX_RECENT_PROJECTS: usize = 5;

/// Environment variable overriding the app data directory
pub const HOME_ENV: &str = "SHOT_LEDGER_HOME";

const APP_DIR_NAME: &str = "shot-ledger";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine user data directory")]
    NoDataDir,
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read/write key-value access to settings
pub trait SettingsBag {
    fn get(&self, key: &str) -> Option<&Value>;
    fn set(&mut self, key: &str, value: Value);
}

impl SettingsBag for Map<String, Value> {
    fn get(&self, key: &str) -> Option<&Value> {
        Map::get(self, key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.insert(key.to_string(), value);
    }
}

/// What to do when a capture or rename targets a name already on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Hand the decision back to the caller
    #[default]
    Ask,
    /// Use the next free `name_N.jpg`, starting at 2
    AutoIncrement,
    /// Move the existing file to the trash and take its name
    Replace,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Ask => "ask",
            DuplicatePolicy::AutoIncrement => "auto_increment",
            DuplicatePolicy::Replace => "replace",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ask" => Ok(DuplicatePolicy::Ask),
            "auto_increment" => Ok(DuplicatePolicy::AutoIncrement),
            "replace" => Ok(DuplicatePolicy::Replace),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}

/// Typed view of the keys the session engine reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub duplicate_handling: DuplicatePolicy,
    pub use_trash: bool,
    pub auto_empty_trash: bool,
    pub undo_delete_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            duplicate_handling: DuplicatePolicy::Ask,
            use_trash: true,
            auto_empty_trash: false,
            undo_delete_limit: 10,
        }
    }
}

impl SessionOptions {
    /// Read options from a bag. Missing or mistyped values use defaults.
    pub fn from_settings(settings: &dyn SettingsBag) -> Self {
        let defaults = Self::default();

        let duplicate_handling = settings
            .get(KEY_DUPLICATE_HANDLING)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.duplicate_handling);

        Self {
            duplicate_handling,
            use_trash: read_bool(settings, KEY_USE_TRASH, defaults.use_trash),
            auto_empty_trash: read_bool(settings, KEY_AUTO_EMPTY_TRASH, defaults.auto_empty_trash),
            undo_delete_limit: settings
                .get(KEY_UNDO_DELETE_LIMIT)
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(defaults.undo_delete_limit),
        }
    }
}

fn read_bool(settings: &dyn SettingsBag, key: &str, default: bool) -> bool {
    settings.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Built-in values for every known key
pub fn default_settings() -> Map<String, Value> {
    let defaults = SessionOptions::default();
    let mut map = Map::new();
    map.insert(KEY_LAST_PROJECT.into(), json!(""));
    map.insert(KEY_RECENT_PROJECTS.into(), json!([]));
    map.insert(KEY_CAMERA_INDEX.into(), json!(0));
    map.insert(
        KEY_DUPLICATE_HANDLING.into(),
        json!(defaults.duplicate_handling.as_str()),
    );
    map.insert(KEY_USE_TRASH.into(), json!(defaults.use_trash));
    map.insert(KEY_AUTO_EMPTY_TRASH.into(), json!(defaults.auto_empty_trash));
    map.insert(KEY_UNDO_DELETE_LIMIT.into(), json!(defaults.undo_delete_limit));
    map
}

/// Locations of everything the application keeps on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    /// Use an explicit data directory
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Resolve the per-user data directory:
    /// - `$SHOT_LEDGER_HOME` if set
    /// - Linux: ~/.local/share/shot-ledger
    /// - macOS: ~/Library/Application Support/shot-ledger
    /// - Windows: %APPDATA%\shot-ledger
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::at(home));
        }

        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoDataDir)?;
        Ok(Self::at(base.join(APP_DIR_NAME)))
    }

    /// Create the data and trash directories
    pub fn ensure(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.trash_dir())?;
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE_NAME)
    }

    pub fn breadcrumb_file(&self) -> PathBuf {
        self.data_dir.join(BREADCRUMB_FILE_NAME)
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.data_dir.join(TRASH_DIR_NAME)
    }
}

/// JSON-backed settings file.
///
/// Values from disk are layered over [`default_settings`]; keys this
/// crate does not know about are kept and written back untouched.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    settings: Map<String, Value>,
}

impl Config {
    /// In-memory config with defaults, saved to `path` on demand
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: default_settings(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::with_defaults(path);
        match fs::read_to_string(&config.path) {
            Ok(contents) => {
                let stored: Map<String, Value> = serde_json::from_str(&contents)?;
                config.settings.extend(stored);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", config.path.display());
            }
            Err(err) => return Err(err.into()),
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.settings)?)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> SessionOptions {
        SessionOptions::from_settings(self)
    }

    /// Recently opened project folders, most recent first
    pub fn recent_projects(&self) -> Vec<String> {
        self.settings
            .get(KEY_RECENT_PROJECTS)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn last_project(&self) -> Option<PathBuf> {
        self.settings
            .get(KEY_LAST_PROJECT)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// Move `path` to the front of the recent list and remember it as
    /// the last project, then persist.
    pub fn add_recent_project(&mut self, path: &str) -> Result<(), ConfigError> {
        let mut recent = self.recent_projects();
        recent.retain(|p| p != path);
        recent.insert(0, path.to_string());
        recent.truncate(MAX_RECENT_PROJECTS);

        self.set(KEY_RECENT_PROJECTS, json!(recent));
        self.set(KEY_LAST_PROJECT, json!(path));
        self.save()
    }
}

impl SettingsBag for Config {
    fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.settings.insert(key.to_string(), value);
    }
}
