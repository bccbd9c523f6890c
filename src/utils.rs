use crate::importer::ExtractionResult;
use crate::locator::{self, DatabaseFile};
use chrono::{DateTime, Local};
use eyre::{Context, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::{Connection, OpenFlags, backup::Backup};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Filename of the live workspace-state database.
pub const PRIMARY_DB_NAME: &str = "state.vscdb";
/// Filename of the editor's backup copy of the state database.
pub const BACKUP_DB_NAME: &str = "state.vscdb.backup";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
/// Rows sampled per table. Rows past this cap are never read.
pub const DEFAULT_ROW_LIMIT: usize = 1000;

/// Configuration required to run the extraction.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone, Debug)]
pub struct ExtractConfig {
    pub root_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Filenames to collect, in pass order. The primary name comes first.
    pub file_names: Vec<String>,
    pub row_limit: usize,
    /// Worker threads. 1 runs the sequential pipeline.
    pub jobs: usize,
    /// Copy each database to a temporary file before reading it.
    pub snapshot: bool,
    pub verbose: bool,
    pub quiet: bool,
}

impl ExtractConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            file_names: default_file_names(),
            row_limit: DEFAULT_ROW_LIMIT,
            jobs: 1,
            snapshot: false,
            verbose: false,
            quiet: false,
        }
    }
}

pub fn default_file_names() -> Vec<String> {
    vec![PRIMARY_DB_NAME.to_string(), BACKUP_DB_NAME.to_string()]
}

/// Cursor keeps one `state.vscdb` per workspace under this directory.
pub fn default_root_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Cursor/User/workspaceStorage"))
}

/// Name of the output document for a run started at `started_at`.
pub fn output_file_name(started_at: &DateTime<Local>) -> String {
    format!(
        "conversations_and_prompts_{}.md",
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/// Everything decided before the first database is opened.
#[derive(Debug)]
pub struct RunPlan {
    pub databases: Vec<DatabaseFile>,
    pub output_path: PathBuf,
}

/// Locate the databases and prepare the output directory.
///
/// Fails without touching the filesystem when the root is missing or holds no
/// candidate databases.
pub fn plan_run(config: &ExtractConfig, started_at: &DateTime<Local>) -> Result<RunPlan> {
    let root = std::path::absolute(&config.root_dir).wrap_err_with(|| {
        format!("Failed to resolve root directory: {}", config.root_dir.display())
    })?;
    if !config.quiet {
        eprintln!("Scanning directory: {}", root.display());
    }

    if !root.is_dir() {
        return Err(eyre!("Directory does not exist: {}", root.display()));
    }

    let databases = locator::locate_databases(&root, &config.file_names)
        .wrap_err_with(|| format!("Failed to read directory: {}", root.display()))?;
    if databases.is_empty() {
        return Err(eyre!("No database files found under {}", root.display()));
    }
    if !config.quiet {
        eprintln!("Found {} database files.", databases.len());
    }

    fs::create_dir_all(&config.output_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;

    Ok(RunPlan {
        databases,
        output_path: config.output_dir.join(output_file_name(started_at)),
    })
}

/// Totals reported once every database has been appended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub output_path: PathBuf,
    pub databases: usize,
    pub conversations: usize,
    pub prompts: usize,
    pub errors: usize,
}

impl RunSummary {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            ..Self::default()
        }
    }

    pub fn record(&mut self, result: &ExtractionResult) {
        self.databases += 1;
        self.conversations += result.conversations.len();
        self.prompts += result.prompts.len();
    }

    pub fn record_error(&mut self) {
        self.databases += 1;
        self.errors += 1;
    }

    pub fn report(&self, quiet: bool) {
        if quiet {
            return;
        }
        let mut line = format!(
            "Done. {} database(s) scanned, {} conversation(s), {} prompt(s).",
            self.databases, self.conversations, self.prompts
        );
        if self.errors > 0 {
            line.push_str(&format!(" Completed with {} error(s).", self.errors));
        }
        eprintln!("{}", line);
        eprintln!(
            "Data extraction completed! Results saved to {}",
            self.output_path.display()
        );
    }
}

/// Default `tracing` filter for the CLI verbosity flags. `RUST_LOG` overrides it.
pub fn log_filter(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "vscdb_chat_export=error"
    } else if verbose {
        "vscdb_chat_export=debug"
    } else {
        "vscdb_chat_export=warn"
    }
}

/// The bar currently drawn, if any. Log lines suspend it while they are written.
static ACTIVE_BAR: Mutex<Option<ProgressBar>> = Mutex::new(None);

fn set_active_bar(bar: Option<ProgressBar>) {
    if let Ok(mut active) = ACTIVE_BAR.lock() {
        *active = bar;
    }
}

fn active_bar() -> Option<ProgressBar> {
    ACTIVE_BAR.lock().ok().and_then(|active| active.clone())
}

/// Stderr writer for `tracing` output that keeps log lines from drawing over the bar.
pub struct LogWriter;

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match active_bar() {
            Some(pb) => pb.suspend(|| io::stderr().write(buf)),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Progress over database files. Hidden in quiet mode, and in verbose mode so
/// debug logs are not drawn over.
pub fn make_bar(total: usize, config: &ExtractConfig) -> ProgressBar {
    if config.quiet || config.verbose {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=>-"));
    }
    set_active_bar(Some(bar.clone()));
    bar
}

pub fn finish_bar(pb: &ProgressBar) {
    pb.finish_and_clear();
    set_active_bar(None);
}

/// Print an operator line above the bar, or straight to stderr when no bar is drawn.
pub fn say(pb: &ProgressBar, quiet: bool, msg: impl AsRef<str>) {
    if quiet {
        return;
    }
    if pb.is_hidden() {
        eprintln!("{}", msg.as_ref());
    } else {
        pb.println(msg.as_ref());
    }
}

pub fn open_db(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open database: {}", path.display()))
}

/// Copy the database into a temporary file with SQLite's online backup, so a
/// database the editor holds open is read in a consistent state.
pub fn backup_database(db_path: &Path) -> Result<NamedTempFile> {
    let src = open_db(db_path)?;

    let tmp = NamedTempFile::new().wrap_err("Failed to create temporary file")?;
    let mut dst =
        Connection::open(tmp.path()).wrap_err("Failed to open snapshot database connection")?;

    {
        let backup = Backup::new(&src, &mut dst).wrap_err("Failed to initialize backup")?;
        backup
            .run_to_completion(1000, Duration::from_millis(5), None)
            .wrap_err("Backup did not complete successfully")?;
    }

    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn quiet_keeps_only_errors() {
        assert_eq!(log_filter(false, true), "vscdb_chat_export=error");
        assert_eq!(log_filter(true, true), "vscdb_chat_export=error");
        assert_eq!(log_filter(true, false), "vscdb_chat_export=debug");
        assert_eq!(log_filter(false, false), "vscdb_chat_export=warn");
    }

    #[test]
    fn drawn_bar_is_registered_for_log_output() {
        let mut config = ExtractConfig::new("/tmp/ws");
        config.quiet = true;
        let _hidden = make_bar(3, &config);
        assert!(active_bar().is_none());

        config.quiet = false;
        let pb = make_bar(3, &config);
        assert!(active_bar().is_some());
        assert_eq!(LogWriter.write(b"").unwrap(), 0);

        finish_bar(&pb);
        assert!(active_bar().is_none());
    }

    #[test]
    fn output_name_uses_run_start_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            output_file_name(&at),
            "conversations_and_prompts_20240309_070501.md"
        );
    }

    #[test]
    fn defaults_match_state_database_layout() {
        let config = ExtractConfig::new("/tmp/ws");
        assert_eq!(config.file_names, vec!["state.vscdb", "state.vscdb.backup"]);
        assert_eq!(config.row_limit, 1000);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.jobs, 1);
    }

    #[test]
    fn missing_root_creates_nothing() {
        let tmp = tempdir().unwrap();
        let mut config = ExtractConfig::new(tmp.path().join("does-not-exist"));
        config.output_dir = tmp.path().join("output");
        config.quiet = true;

        let err = plan_run(&config, &Local::now()).unwrap_err();
        assert!(format!("{err}").contains("Directory does not exist"));
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn root_without_databases_creates_nothing() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("ws");
        fs::create_dir_all(root.join("abc123")).unwrap();
        fs::write(root.join("abc123/workspace.json"), "{}").unwrap();

        let mut config = ExtractConfig::new(&root);
        config.output_dir = tmp.path().join("output");
        config.quiet = true;

        let err = plan_run(&config, &Local::now()).unwrap_err();
        assert!(format!("{err}").contains("No database files found"));
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn snapshot_copies_tables() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("state.vscdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ItemTable (key TEXT, value BLOB);
             INSERT INTO ItemTable VALUES ('k', '{}');",
        )
        .unwrap();
        drop(conn);

        let snapshot = backup_database(&path).unwrap();
        let copy = open_db(snapshot.path()).unwrap();
        let count: i64 = copy
            .query_row("SELECT COUNT(*) FROM ItemTable", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
