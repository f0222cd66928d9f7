//! Background ledger persistence
//!
//! Ledger writes can be slow (network shares, spreadsheet apps holding
//! the file). The LedgerWriter moves them off the caller's thread while
//! keeping at most one write in flight. Memory is the source of truth,
//! so when jobs pile up a full rewrite makes everything queued before it
//! redundant. A failed write stays reported until a rewrite succeeds:
//! appends that land after a failure leave the file short.

use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinHandle};

use super::data::PhotoRecord;
use super::error::LedgerError;
use super::ledger::LedgerStore;

/// One unit of ledger persistence
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerJob {
    Append(PhotoRecord),
    Rewrite(Vec<PhotoRecord>),
}

enum Command {
    Persist(LedgerJob),
    Flush(oneshot::Sender<Option<String>>),
}

/// Serialized background writer for one [`LedgerStore`]
pub struct LedgerWriter {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl LedgerWriter {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn(store: LedgerStore) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(store, rx));
        Self { tx, handle }
    }

    /// Queue a job. Returns false if the worker has stopped.
    pub fn submit(&self, job: LedgerJob) -> bool {
        self.tx.send(Command::Persist(job)).is_ok()
    }

    /// Wait until everything submitted so far has been written.
    ///
    /// Returns the message of the last failure not yet healed by a
    /// successful rewrite.
    pub async fn flush(&self) -> Option<String> {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Flush(reply)).is_err() {
            return Some("ledger writer has stopped".to_string());
        }
        done.await
            .unwrap_or_else(|_| Some("ledger writer has stopped".to_string()))
    }

    /// Drain the queue and stop the worker
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(err) = self.handle.await {
            tracing::warn!("Ledger writer ended abnormally: {err}");
        }
    }
}

async fn run(store: LedgerStore, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut last_error: Option<String> = None;

    while let Some(first) = rx.recv().await {
        let mut jobs = Vec::new();
        let mut waiters = Vec::new();

        let mut next = Some(first);
        while let Some(command) = next {
            match command {
                Command::Persist(job) => jobs.push(job),
                Command::Flush(reply) => waiters.push(reply),
            }
            next = rx.try_recv().ok();
        }

        let jobs = coalesce(jobs);
        if !jobs.is_empty() {
            let store = store.clone();
            let count = jobs.len();
            match task::spawn_blocking(move || apply(&store, jobs)).await {
                Ok(Ok(rewrote)) => {
                    tracing::debug!("Ledger writer applied {count} job(s)");
                    if rewrote {
                        last_error = None;
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!("Background ledger save failed: {err}");
                    last_error = Some(err.user_message());
                }
                Err(err) => {
                    tracing::warn!("Ledger write task failed: {err}");
                    last_error = Some(format!("ledger write task failed: {err}"));
                }
            }
        }

        for waiter in waiters {
            let _ = waiter.send(last_error.clone());
        }
    }
}

/// Drop every job queued before the last full rewrite
pub fn coalesce(mut jobs: Vec<LedgerJob>) -> Vec<LedgerJob> {
    match jobs
        .iter()
        .rposition(|job| matches!(job, LedgerJob::Rewrite(_)))
    {
        Some(last_rewrite) => jobs.split_off(last_rewrite),
        None => jobs,
    }
}

/// Run jobs in order. Returns whether a full rewrite was among them.
fn apply(store: &LedgerStore, jobs: Vec<LedgerJob>) -> Result<bool, LedgerError> {
    let mut rewrote = false;
    for job in jobs {
        match job {
            LedgerJob::Append(record) => store.append(&record)?,
            LedgerJob::Rewrite(records) => {
                store.rewrite(&records)?;
                rewrote = true;
            }
        }
    }
    Ok(rewrote)
}
