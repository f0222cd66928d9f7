use anyhow::{bail, Context, Result};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use shot_ledger::{
    AddOutcome, AppPaths, Config, DuplicateResolution, ImageFileSource, LedgerWriter,
    PendingCapture, PhotoSession, RecoveryStore, SessionError, UpdateOutcome,
};

const HELP: &str = "\
commands:
  status
  list
  add <subfolder> <name> <image>   log a photo from an image file
  rename <index> <subfolder> <name>
  delete <index>
  undo                             restore the last deletion
  keep | replace | skip            answer a pending duplicate
  export <path>
  sync                             rewrite the ledger from memory
  end                              end the session
  quit";

/// Line-driven front end over a capture session.
///
/// Ledger writes go through a background [`LedgerWriter`]; the shell
/// waits for them after every command so failures are reported on the
/// command that caused them.
struct Shell {
    session: PhotoSession<Config>,
    /// Capture waiting on a duplicate decision
    pending: Option<PendingCapture>,
}

impl Shell {
    fn new(mut session: PhotoSession<Config>) -> Self {
        session.attach_writer(LedgerWriter::spawn(session.ledger().clone()));
        Self {
            session,
            pending: None,
        }
    }

    async fn run(&mut self, input: impl BufRead, mut out: impl Write) -> Result<()> {
        writeln!(
            out,
            "Project {} ({} photos). Type 'help' for commands.",
            self.session.project_folder().display(),
            self.session.photo_count()
        )?;

        for line in input.lines() {
            let line = line?;
            let args: Vec<&str> = line.split_whitespace().collect();
            let Some((&command, rest)) = args.split_first() else {
                continue;
            };
            if command == "quit" || command == "exit" {
                break;
            }

            match self.dispatch(command, rest) {
                Ok(message) => writeln!(out, "{message}")?,
                Err(err) => writeln!(out, "error: {err:#}")?,
            }
            if let Some(warning) = self.session.flush_ledger().await {
                writeln!(out, "warning: {warning}")?;
            }
        }

        if let Some(warning) = self.session.detach_writer().await {
            writeln!(out, "warning: {warning}")?;
        }
        Ok(())
    }

    fn dispatch(&mut self, command: &str, args: &[&str]) -> Result<String> {
        match (command, args) {
            ("help", _) => Ok(HELP.to_string()),
            ("add", [subfolder, name, image]) => {
                let mut source = ImageFileSource::new(*image);
                let outcome = self.session.capture_photo(&mut source, subfolder, name)?;
                Ok(self.report_add(outcome))
            }
            ("keep" | "replace", []) => {
                let pending = self.pending.take().context("no duplicate is pending")?;
                let resolution = if command == "keep" {
                    DuplicateResolution::KeepBoth
                } else {
                    DuplicateResolution::Replace
                };
                let outcome = self.session.resolve_duplicate(pending, resolution)?;
                Ok(self.report_add(outcome))
            }
            ("skip", []) => match self.pending.take() {
                Some(_) => Ok("Capture cancelled".to_string()),
                None => bail!("no duplicate is pending"),
            },
            ("rename", [index, subfolder, name]) => {
                let index = parse_index(index)?;
                match self.session.update_photo(index, subfolder, name)? {
                    UpdateOutcome::Updated { record, save_error } => Ok(with_warning(
                        format!("Saved: {}", record.file_path.display()),
                        save_error,
                    )),
                    UpdateOutcome::Duplicate { existing_path } => Ok(format!(
                        "{} already exists; pick another name",
                        existing_path.display()
                    )),
                }
            }
            ("delete", [index]) => {
                let outcome = self.session.delete_photo(parse_index(index)?)?;
                let hint = if outcome.undoable { " (undo available)" } else { "" };
                Ok(with_warning(
                    format!("Deleted {}{hint}", outcome.record.filename),
                    outcome.save_error,
                ))
            }
            ("undo", []) => match self.session.undo_delete() {
                Ok(outcome) => Ok(with_warning(
                    format!("Restored {} at #{}", outcome.record.filename, outcome.index),
                    outcome.save_error,
                )),
                Err(SessionError::NothingToUndo) => Ok("Nothing to undo".to_string()),
                Err(err) => Err(err.into()),
            },
            ("status", []) => Ok(self.status()),
            ("list", []) => Ok(self.listing()),
            ("export", [path]) => {
                let outcome = self.session.export_report(Path::new(path))?;
                Ok(format!(
                    "Exported {} photo(s) to {}",
                    outcome.count,
                    outcome.path.display()
                ))
            }
            ("sync", []) => {
                self.session.sync_ledger()?;
                Ok("Ledger rewritten".to_string())
            }
            ("end", []) => {
                self.session.end_session()?;
                self.pending = None;
                Ok("Session ended. Photos in the project folder were kept.".to_string())
            }
            _ => bail!("unrecognised command '{command}' (try 'help')"),
        }
    }

    fn report_add(&mut self, outcome: AddOutcome) -> String {
        match outcome {
            AddOutcome::Added { record, save_error } => {
                with_warning(format!("Captured: {}", record.filename), save_error)
            }
            AddOutcome::Duplicate(pending) => {
                let message = format!(
                    "'{}' already exists in {}/ - answer keep, replace or skip",
                    pending.display_name, pending.subfolder
                );
                self.pending = Some(pending);
                message
            }
        }
    }

    fn status(&self) -> String {
        let session = &self.session;
        let subfolders = session.subfolders();
        let mut lines = vec![
            format!("Project: {}", session.project_folder().display()),
            format!("Photos: {}", session.photo_count()),
            format!(
                "Subfolders: {}",
                if subfolders.is_empty() {
                    "-".to_string()
                } else {
                    subfolders.join(", ")
                }
            ),
            format!("Undo available: {}", session.undo_depth()),
            format!("Duplicates: {}", session.options().duplicate_handling),
        ];
        if session.pending_saves() > 0 {
            lines.push(format!(
                "Unsaved ledger changes: {} (run 'sync')",
                session.pending_saves()
            ));
        }
        if let Some(pending) = &self.pending {
            lines.push(format!(
                "Waiting on duplicate: {}",
                pending.existing_path.display()
            ));
        }
        lines.join("\n")
    }

    fn listing(&self) -> String {
        if self.session.photo_count() == 0 {
            return "No photos in session".to_string();
        }
        self.session
            .photos()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "#{i:<3} {}  {}/{}",
                    p.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    p.subfolder,
                    p.filename
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn parse_index(raw: &str) -> Result<usize> {
    raw.trim_start_matches('#')
        .parse()
        .with_context(|| format!("'{raw}' is not a photo index"))
}

fn with_warning(message: String, save_error: Option<String>) -> String {
    match save_error {
        Some(warning) => format!("{message}\nwarning: {warning}"),
        None => message,
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shot_ledger=info")),
        )
        .init();

    let paths = AppPaths::discover()?;
    paths.ensure().context("cannot create application data directory")?;
    let mut config = Config::load(paths.config_file())?;

    let recovery = RecoveryStore::new(paths.breadcrumb_file());
    let interrupted = match recovery.load() {
        Ok(crumb) => crumb,
        Err(err) => {
            tracing::warn!("Ignoring unreadable session breadcrumb: {err}");
            None
        }
    };

    // Project folder: argument, else the interrupted session, else the last project
    let project_folder = match std::env::args().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => match (&interrupted, config.last_project()) {
            (Some(crumb), _) => {
                eprintln!(
                    "Resuming session in {} ({} photos, last activity {})",
                    crumb.project_folder.display(),
                    crumb.photo_count,
                    crumb.last_activity
                );
                crumb.project_folder.clone()
            }
            (None, Some(last)) => last,
            (None, None) => bail!("usage: shot-ledger <project-folder>"),
        },
    };

    if !project_folder.is_dir() {
        bail!("project folder {} does not exist", project_folder.display());
    }
    config
        .add_recent_project(&project_folder.to_string_lossy())
        .context("cannot save settings")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start runtime")?;

    runtime.block_on(async {
        let session = PhotoSession::open_in(project_folder, config, &paths);
        let mut shell = Shell::new(session);
        let stdin = io::stdin();
        shell.run(stdin.lock(), io::stdout()).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    async fn run_script(script: &str) -> (tempfile::TempDir, String) {
        let root = tempdir().unwrap();
        let project = root.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let paths = AppPaths::at(root.path().join("data"));

        let image = root.path().join("frame.png");
        image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]))
            .save(&image)
            .unwrap();

        let config = Config::with_defaults(paths.config_file());
        let mut shell = Shell::new(PhotoSession::open_in(&project, config, &paths));

        let script = script.replace("$IMG", &image.to_string_lossy());
        let mut out = Vec::new();
        shell.run(Cursor::new(script), &mut out).await.unwrap();
        (root, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_shell_duplicate_then_keep() {
        let (root, out) = run_script("add HR John $IMG\nadd HR John $IMG\nkeep\nlist\n").await;

        assert!(out.contains("Captured: John.jpg"));
        assert!(out.contains("answer keep, replace or skip"));
        assert!(out.contains("Captured: John_2.jpg"));
        assert!(root.path().join("project/HR/John_2.jpg").exists());
    }

    #[tokio::test]
    async fn test_shell_delete_and_undo() {
        let (root, out) = run_script("add HR Ana $IMG\ndelete 0\nundo\nundo\nstatus\n").await;

        assert!(out.contains("Deleted Ana.jpg (undo available)"));
        assert!(out.contains("Restored Ana.jpg at #0"));
        assert!(out.contains("Nothing to undo"));
        assert!(out.contains("Photos: 1"));
        assert!(root.path().join("project/HR/Ana.jpg").exists());
    }

    #[tokio::test]
    async fn test_shell_reports_bad_input_and_keeps_going() {
        let (_root, out) = run_script("delete x\nfrobnicate\nskip\nquit\nstatus\n").await;

        assert!(out.contains("'x' is not a photo index"));
        assert!(out.contains("unrecognised command 'frobnicate'"));
        assert!(out.contains("no duplicate is pending"));
        assert!(!out.contains("Photos:"));
    }

    #[tokio::test]
    async fn test_shell_ledger_matches_session_on_exit() {
        let (root, out) =
            run_script("add HR A $IMG\nadd HR B $IMG\nrename 1 Sales Bea\ndelete 0\n").await;

        assert!(!out.contains("warning:"));
        let ledger = shot_ledger::LedgerStore::new(root.path().join("data/Session_Data.csv"));
        let rows = ledger.read_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].filename, "Bea.jpg");
        assert_eq!(rows[0].subfolder, "Sales");
    }
}
