//! I/O utilities for chat dump files.
//!
//! This module reads and writes NDJSON chat dumps and the metadata files that
//! accompany them.

pub mod ndjson;

// Re-export commonly used types and functions
pub use ndjson::{read_messages, write_messages, ChatDumpError};
