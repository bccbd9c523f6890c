use crate::importer::ExtractionResult;
use eyre::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write the section for one database file.
///
/// A file without conversations still gets a marker line; a file without prompts
/// gets no prompts section at all. Prompt numbering starts at 1 for every call.
pub fn write_extraction_markdown<W: Write>(
    writer: &mut W,
    result: &ExtractionResult,
) -> std::io::Result<()> {
    if result.conversations.is_empty() {
        writeln!(writer, "# No conversations found.")?;
    } else {
        writeln!(writer, "# Conversations")?;
        for conversation in &result.conversations {
            writeln!(writer, "## Key: {}", conversation.key)?;
            for message in &conversation.messages {
                writeln!(writer, "**{}**: {}", message.sender, message.text.trim())?;
            }
            writeln!(writer)?;
            writeln!(writer, "---")?;
        }
    }

    if !result.prompts.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "# Prompts")?;
        for (i, prompt) in result.prompts.iter().enumerate() {
            writeln!(writer, "{}. {}", i + 1, prompt.text.trim())?;
        }
    }

    Ok(())
}

/// Append one database file's section to the output document.
///
/// The document is opened, written and closed on every call, so an interrupted run
/// leaves every finished section intact.
pub fn append_extraction(output_path: &Path, result: &ExtractionResult) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_path)
        .wrap_err_with(|| format!("Failed to open output: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    write_extraction_markdown(&mut writer, result)
        .wrap_err_with(|| format!("Failed to write output: {}", output_path.display()))?;
    writer.flush().wrap_err("Failed to flush output")?;
    Ok(())
}
