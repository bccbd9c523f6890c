//! # vscdb-chat-export
//!
//! A CLI tool that exports AI chat conversations and prompts from VS Code derived editors
//! (Cursor and friends) to a single local Markdown file.
//!
//! ## What it does
//!
//! The editor keeps one SQLite database (`state.vscdb`, plus a `state.vscdb.backup`
//! copy) per workspace under its `workspaceStorage` directory. Chats and prompts live
//! there as JSON blobs in generic key/value tables. This tool walks the storage
//! directory, reads every such database, picks out the rows that look like
//! conversations or prompts, and appends them to
//! `output/conversations_and_prompts_<YYYYMMDD>_<HHMMSS>.md`.
//!
//! The databases are opened **read-only**. With `--snapshot`, each one is first copied
//! through SQLite's online backup, so a database the editor is holding open is still
//! read consistently.
//!
//! ## Usage
//!
//! ```sh
//! # Scan the default workspace storage of Cursor
//! vscdb-chat-export
//!
//! # Scan another directory, four databases at a time
//! vscdb-chat-export ~/backup/workspaceStorage --jobs 4
//! ```
//!
//! Preferences can be persisted in `~/.config/vscdb-chat-export/config.toml`.
//!
//! ## Compatibility
//!
//! The editors' JSON layout is undocumented. Rows are matched by field presence
//! (`conversation`, `textDescription`), so unknown or malformed rows are skipped rather
//! than failing the export.

pub mod importer;
pub mod locator;
pub mod parallel;
pub mod renderer;
pub mod sequential;
pub mod utils;

pub use importer::{
    ConversationRecord, ExtractionResult, MessageRecord, PromptRecord, Record, RowError, Sender,
};
pub use locator::DatabaseFile;
pub use utils::{ExtractConfig, RunSummary};

/// Run an extraction, sequentially or on `config.jobs` threads.
pub fn run(config: &ExtractConfig) -> eyre::Result<RunSummary> {
    if config.jobs > 1 {
        parallel::execute(config)
    } else {
        sequential::execute(config)
    }
}
