//! NDJSON (Newline Delimited JSON) chat dump utilities.
//!
//! A chat dump is one JSON `Message` per line. The stream metadata lives next
//! to it in `<name>.meta.json`.

use crate::models::{Message, StreamMetadata};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types for reading and writing chat dumps.
#[derive(Error, Debug)]
pub enum ChatDumpError {
    /// I/O error when reading files
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error at line {line}: {source}")]
    JsonParse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid file format
    #[error("Invalid file format: {reason}")]
    InvalidFormat { reason: String },

    /// Generic error with context
    #[error("Error in {context}: {message}")]
    Generic { context: String, message: String },
}

impl ChatDumpError {
    /// Create a new generic error with context
    pub fn generic(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generic {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an invalid format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}

/// Parse an NDJSON file line by line.
///
/// Empty lines are skipped. An empty file yields an empty vector.
///
/// # Arguments
/// * `path` - Path to the NDJSON file
/// * `validate_entry` - Optional validation function for each entry
pub fn parse_ndjson_file_generic<T, F>(
    path: &Path,
    validate_entry: Option<F>,
) -> Result<Vec<T>, ChatDumpError>
where
    T: for<'de> Deserialize<'de>,
    F: Fn(&T) -> Result<(), ChatDumpError>,
{
    let file = File::open(path).map_err(|e| {
        ChatDumpError::generic(
            "opening file",
            format!("Failed to open '{}': {}", path.display(), e),
        )
    })?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let entry: T = serde_json::from_str(&line).map_err(|e| ChatDumpError::JsonParse {
            line: line_number + 1,
            source: e,
        })?;

        if let Some(ref validator) = validate_entry {
            validator(&entry)?;
        }

        entries.push(entry);
    }

    Ok(entries)
}

/// Read a chat dump, rejecting negative or non-finite timestamps.
pub fn read_messages(path: &Path) -> Result<Vec<Message>, ChatDumpError> {
    parse_ndjson_file_generic(
        path,
        Some(|message: &Message| {
            if message.timestamp.is_finite() && message.timestamp >= 0.0 {
                Ok(())
            } else {
                Err(ChatDumpError::invalid_format(format!(
                    "Invalid timestamp ({})",
                    message.timestamp
                )))
            }
        }),
    )
}

/// Write messages as NDJSON, one per line.
pub fn write_messages(path: &Path, messages: &[Message]) -> Result<(), ChatDumpError> {
    write_ndjson(path, messages)
}

/// Write any serializable entries as NDJSON.
pub fn write_ndjson<T: Serialize>(path: &Path, entries: &[T]) -> Result<(), ChatDumpError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(|e| {
            ChatDumpError::generic("serializing entry", e.to_string())
        })?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

/// `<dir>/<stem>.meta.json` for a dump at `<dir>/<stem>.<ext>`
pub fn metadata_path_for(dump: &Path) -> PathBuf {
    let stem = dump
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    dump.with_file_name(format!("{}.meta.json", stem))
}

/// Read the metadata file that accompanies a dump.
pub fn read_metadata(path: &Path) -> Result<StreamMetadata, ChatDumpError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ChatDumpError::generic(
            "opening file",
            format!("Failed to open '{}': {}", path.display(), e),
        )
    })?;
    serde_json::from_str(&content).map_err(|e| ChatDumpError::JsonParse { line: 1, source: e })
}

pub fn write_metadata(path: &Path, metadata: &StreamMetadata) -> Result<(), ChatDumpError> {
    let content = serde_json::to_string_pretty(metadata)
        .map_err(|e| ChatDumpError::generic("serializing metadata", e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}
