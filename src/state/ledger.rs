use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::data::PhotoRecord;
use super::error::LedgerError;

/// Fixed column schema of the ledger, in file order
pub const COLUMNS: [&str; 5] = ["Timestamp", "Subfolder", "Name", "Filename", "File Path"];

/// Default file name of the session ledger inside the app data directory
pub const LEDGER_FILE_NAME: &str = "Session_Data.csv";

/// The LedgerStore owns the tabular file of record for a session.
///
/// Every live photo is one row, in capture order. Row identity is
/// positional, so structural changes go through [`LedgerStore::rewrite`]
/// while a single capture can use [`LedgerStore::append`].
#[derive(Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the path to the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all rows from the ledger.
    ///
    /// A missing ledger is created header-only. An unreadable or
    /// malformed ledger is treated the same way: it is reinitialized and
    /// the session starts empty.
    pub fn load(&self) -> Vec<PhotoRecord> {
        if !self.path.exists() {
            if let Err(err) = self.initialize() {
                tracing::warn!("Error initializing ledger: {err}");
            }
            return Vec::new();
        }

        match self.read_rows() {
            Ok(records) => {
                tracing::info!(
                    "Loaded {} photo(s) from {}",
                    records.len(),
                    self.path.display()
                );
                records
            }
            Err(err) => {
                tracing::warn!("Error loading ledger, starting empty: {err}");
                if let Err(err) = self.initialize() {
                    tracing::warn!("Error initializing ledger: {err}");
                }
                Vec::new()
            }
        }
    }

    /// Parse every row of the ledger file
    pub fn read_rows(&self) -> Result<Vec<PhotoRecord>, LedgerError> {
        let file = File::open(&self.path).map_err(|e| LedgerError::from_io(&self.path, e))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| LedgerError::from_csv(&self.path, e))?
            .clone();
        if headers.iter().ne(COLUMNS.iter().copied()) {
            return Err(LedgerError::Schema {
                path: self.path.clone(),
                found: headers.iter().collect::<Vec<_>>().join(","),
            });
        }

        reader
            .deserialize::<PhotoRecord>()
            .map(|row| row.map_err(|e| LedgerError::from_csv(&self.path, e)))
            .collect()
    }

    /// Reset the ledger to a header-only file
    pub fn initialize(&self) -> Result<(), LedgerError> {
        write_rows(&self.path, &[])
    }

    /// Overwrite the whole ledger from the given records
    pub fn rewrite(&self, records: &[PhotoRecord]) -> Result<(), LedgerError> {
        write_rows(&self.path, records)?;
        tracing::debug!("Rewrote ledger with {} row(s)", records.len());
        Ok(())
    }

    /// Add a single row at the end of the ledger.
    ///
    /// Reads the existing rows and writes them back with the new one.
    /// This is not atomic: a failure half way through leaves whatever
    /// the write produced, and callers treat it as a warning.
    pub fn append(&self, record: &PhotoRecord) -> Result<(), LedgerError> {
        let mut records = if self.path.exists() {
            self.read_rows()?
        } else {
            Vec::new()
        };
        records.push(record.clone());
        write_rows(&self.path, &records)
    }

    /// Write records to an arbitrary destination in the ledger schema
    pub fn write_to(destination: &Path, records: &[PhotoRecord]) -> Result<(), LedgerError> {
        write_rows(destination, records)
    }
}

/// Write the header followed by one row per record
fn write_rows(path: &Path, records: &[PhotoRecord]) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| LedgerError::from_io(parent, e))?;
    }

    let file = File::create(path).map_err(|e| LedgerError::from_io(path, e))?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));

    writer
        .write_record(COLUMNS)
        .map_err(|e| LedgerError::from_csv(path, e))?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| LedgerError::from_csv(path, e))?;
    }
    writer.flush().map_err(|e| LedgerError::from_io(path, e))?;

    Ok(())
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("path", &self.path)
            .finish()
    }
}
