use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vscdb_chat_export::utils::{self, ExtractConfig};

/// Export AI conversations and prompts from editor workspace-storage databases
/// (state.vscdb) into one Markdown file.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to scan recursively for state.vscdb files.
    /// Defaults to Cursor's workspaceStorage if not set in config.
    #[arg(value_name = "ROOT_DIR")]
    root_dir: Option<PathBuf>,

    /// Directory the Markdown file is written to.
    /// Defaults to ./output if not set in config.
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/vscdb-chat-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Maximum rows read from each table.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    row_limit: Option<u64>,

    /// Databases scanned in parallel. Output order does not change.
    #[arg(short, long, value_name = "N", default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..))]
    jobs: u64,

    /// Copy each database to a temporary file before reading it.
    #[arg(long)]
    snapshot: bool,

    /// Log per-table details and skipped rows.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress progress output and warnings. Fatal errors still print.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    root_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    row_limit: Option<usize>,
    file_names: Option<Vec<String>>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("vscdb-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_filter = utils::log_filter(verbose, quiet);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(|| utils::LogWriter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve root_dir (CLI > Config > Auto-detect)
    let root_dir = cli
        .root_dir
        .or(file_cfg.root_dir)
        .or_else(utils::default_root_dir)
        .ok_or_else(|| {
            eyre!("Could not determine workspace storage directory.\nPass ROOT_DIR, or set root_dir in config.toml.")
        })?;

    // 3. Build the extraction config (CLI > Config > Default)
    let mut config = ExtractConfig::new(root_dir);
    if let Some(dir) = cli.output_dir.or(file_cfg.output_dir) {
        config.output_dir = dir;
    }
    if let Some(limit) = cli.row_limit.map(|n| n as usize).or(file_cfg.row_limit) {
        if limit == 0 {
            return Err(eyre!("row_limit must be at least 1"));
        }
        config.row_limit = limit;
    }
    if let Some(names) = file_cfg.file_names.filter(|n| !n.is_empty()) {
        config.file_names = names;
    }
    config.jobs = cli.jobs as usize;
    config.snapshot = cli.snapshot;
    config.verbose = cli.verbose;
    config.quiet = cli.quiet;

    // 4. Run the extraction
    vscdb_chat_export::run(&config)?;
    Ok(())
}
