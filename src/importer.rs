//! Record types and the shape heuristics that pull them out of workspace-state tables.
//!
//! VS Code derived editors keep per-workspace state in a SQLite file (`state.vscdb`)
//! with generic key/value tables:
//! ```sql
//! CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
//! CREATE TABLE cursorDiskKV (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
//! ```
//! Values are usually UTF-8 JSON, stored as TEXT or BLOB. The JSON schema is undocumented
//! and changes between editor versions, so matching is by field presence only:
//! - a mapping with a `conversation` field is a chat (`[{"type": 1, "text": "..."}, ...]`)
//! - a `textDescription` field, on the value itself or on mappings inside a top-level
//!   array, is a prompt

use crate::utils::{self, ExtractConfig};
use eyre::{Context, Result};
use rusqlite::Connection;
use rusqlite::types::{Type, ValueRef};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

const CONVERSATION_FIELD: &str = "conversation";
const PROMPT_FIELD: &str = "textDescription";
/// `type` value marking a message written by the user.
const USER_MESSAGE_TYPE: f64 = 1.0;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::User => f.write_str("User"),
            Sender::Assistant => f.write_str("Assistant"),
        }
    }
}

/// One entry of a conversation's message array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub sender: Sender,
    /// Trimmed. Empty when the entry has no string `text`.
    pub text: String,
}

impl MessageRecord {
    /// Never fails: entries that are not mappings, or lack fields, take the defaults.
    ///
    /// Only a numeric `type` of 1 marks the user. A boolean `true` is not numeric and
    /// renders as the assistant, although loosely typed readers compare it equal to 1.
    pub fn from_value(value: &Value) -> Self {
        let sender = match value.get("type").and_then(Value::as_f64) {
            Some(t) if t == USER_MESSAGE_TYPE => Sender::User,
            _ => Sender::Assistant,
        };
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        Self { sender, text }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRecord {
    /// Key of the row the conversation was read from.
    pub key: String,
    /// In the order of the stored array.
    pub messages: Vec<MessageRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptRecord {
    /// Trimmed.
    pub text: String,
}

impl PromptRecord {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.trim().to_string(),
        }
    }
}

/// Anything a single row can contribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Conversation(ConversationRecord),
    Prompt(PromptRecord),
}

/// Everything found in one database file, in table order then row order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    pub conversations: Vec<ConversationRecord>,
    pub prompts: Vec<PromptRecord>,
}

impl ExtractionResult {
    pub fn push(&mut self, record: Record) {
        match record {
            Record::Conversation(c) => self.conversations.push(c),
            Record::Prompt(p) => self.prompts.push(p),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Why a row contributed nothing. Rows failing this way are counted and skipped.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("value is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("value is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unsupported value type: {0}")]
    UnsupportedType(Type),
}

/// A mapping with a `conversation` field. A non-array field yields a record with no messages.
pub fn classify_conversation(key: &str, value: &Value) -> Option<ConversationRecord> {
    let conversation = value.as_object()?.get(CONVERSATION_FIELD)?;
    let messages = conversation
        .as_array()
        .map(|entries| entries.iter().map(MessageRecord::from_value).collect())
        .unwrap_or_default();
    Some(ConversationRecord {
        key: key.to_string(),
        messages,
    })
}

/// `textDescription` strings, from the value itself or from mappings in a top-level array.
pub fn classify_prompts(value: &Value) -> Vec<PromptRecord> {
    match value {
        Value::Array(items) => items.iter().filter_map(prompt_field).collect(),
        Value::Object(_) => prompt_field(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn prompt_field(value: &Value) -> Option<PromptRecord> {
    value
        .as_object()?
        .get(PROMPT_FIELD)?
        .as_str()
        .map(PromptRecord::new)
}

/// Decode, parse and classify one stored value.
///
/// NULL and empty values are not errors; they just carry nothing.
pub fn classify_value(key: &str, value: ValueRef<'_>) -> Result<Vec<Record>, RowError> {
    let text = match value {
        ValueRef::Null => return Ok(Vec::new()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => std::str::from_utf8(bytes)?,
        other => return Err(RowError::UnsupportedType(other.data_type())),
    };
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: Value = serde_json::from_str(text)?;

    let mut records = Vec::new();
    if let Some(conversation) = classify_conversation(key, &parsed) {
        records.push(Record::Conversation(conversation));
    }
    records.extend(classify_prompts(&parsed).into_iter().map(Record::Prompt));
    Ok(records)
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Per-table row counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    pub rows: usize,
    pub skipped: usize,
}

pub fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tables)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn key_to_string(key: ValueRef<'_>) -> String {
    match key {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Read up to `row_limit` `(key, value)` rows of `table` into `result`.
///
/// Each row is read once and offered to both classifiers. Rows that fail to decode
/// or parse are skipped. Errors returned here concern the table as a whole (e.g. it
/// has no `key`/`value` columns); rows already read stay in `result`.
pub fn scan_table(
    conn: &Connection,
    table: &str,
    row_limit: usize,
    result: &mut ExtractionResult,
) -> rusqlite::Result<TableStats> {
    tracing::debug!(table, "searching for conversations and prompts");

    let sql = format!(
        "SELECT key, value FROM {} LIMIT ?1",
        quote_identifier(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let limit = i64::try_from(row_limit).unwrap_or(i64::MAX);
    let mut rows = stmt.query([limit])?;

    let mut stats = TableStats::default();
    while let Some(row) = rows.next()? {
        stats.rows += 1;
        let key = key_to_string(row.get_ref(0)?);
        match classify_value(&key, row.get_ref(1)?) {
            Ok(records) => records.into_iter().for_each(|r| result.push(r)),
            Err(e) => {
                stats.skipped += 1;
                tracing::trace!(table, key = key.as_str(), "skipping row: {e}");
            }
        }
    }

    if stats.skipped > 0 {
        tracing::debug!(
            table,
            rows = stats.rows,
            skipped = stats.skipped,
            "skipped malformed rows"
        );
    }
    Ok(stats)
}

/// Scan every table of one database file.
///
/// An error means the file could not be opened or its catalog read. Failures of
/// individual tables are logged and do not stop the scan.
pub fn scan_database(path: &Path, config: &ExtractConfig) -> Result<ExtractionResult> {
    let snapshot = if config.snapshot {
        Some(utils::backup_database(path)?)
    } else {
        None
    };
    let conn = utils::open_db(snapshot.as_ref().map_or(path, |s| s.path()))?;

    let tables = list_tables(&conn)
        .wrap_err_with(|| format!("Failed to list tables: {}", path.display()))?;

    let mut result = ExtractionResult::default();
    for table in &tables {
        if let Err(e) = scan_table(&conn, table, config.row_limit, &mut result) {
            tracing::warn!(
                db = %path.display(),
                table = table.as_str(),
                "error extracting from table: {e}"
            );
        }
    }

    drop(conn);
    Ok(result)
}
