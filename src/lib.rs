//! Capture-session engine for Shot Ledger.
//!
//! Photos taken during an on-site session are filed under
//! `project/<subfolder>/<name>.jpg` and logged in a tabular ledger.
//! [`PhotoSession`] keeps the files, the trash and the ledger
//! consistent across captures, renames, deletions and undo.

pub mod capture;
pub mod config;
pub mod state;

pub use capture::{CaptureError, FrameSource, ImageFileSource};
pub use config::{AppPaths, Config, DuplicatePolicy, SessionOptions, SettingsBag};
pub use state::data::{
    ActiveSession, AddOutcome, DeleteOutcome, DuplicateResolution, ExportOutcome, PendingCapture,
    PhotoRecord, UndoOutcome, UpdateOutcome,
};
pub use state::error::{LedgerError, SessionError, TrashError};
pub use state::ledger::LedgerStore;
pub use state::recovery::RecoveryStore;
pub use state::session::PhotoSession;
pub use state::trash::TrashManager;
pub use state::writer::{LedgerJob, LedgerWriter};
