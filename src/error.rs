//! Error types shared by the cache, the signal pipeline and the context resolver.

use crate::cache::integrity::Corruption;
use std::path::Path;
use thiserror::Error;

/// Comprehensive error type for the highlight core.
///
/// A cache miss is not an error (`CacheStore::get` returns `Ok(None)`), and an
/// incomplete cached prefix is reported through `CacheEntry::is_incomplete`.
#[derive(Error, Debug)]
pub enum KirinukiError {
    /// Unrecoverable cache damage. The entry must be reset and fetched again.
    #[error("Cache entry '{stream_id}' is corrupt: {reason}")]
    CorruptEntry {
        stream_id: String,
        reason: Corruption,
    },

    /// Malformed configuration or context source
    #[error("Configuration error in {context}: {message}")]
    Config { context: String, message: String },

    /// The message timeline cannot be analysed
    #[error("Invalid pipeline input: {reason}")]
    PipelineInput { reason: String },

    /// The external collector failed to deliver chat data
    #[error("Collector failed for '{stream_id}': {message}")]
    Collector { stream_id: String, message: String },

    /// I/O error with the operation that caused it
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with context
    #[error(transparent)]
    General(#[from] anyhow::Error),
}

impl KirinukiError {
    /// Create a configuration error
    pub fn config(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a corrupt entry error
    pub fn corrupt(stream_id: impl Into<String>, reason: Corruption) -> Self {
        Self::CorruptEntry {
            stream_id: stream_id.into(),
            reason,
        }
    }

    /// Create a pipeline input error
    pub fn pipeline_input(reason: impl Into<String>) -> Self {
        Self::PipelineInput {
            reason: reason.into(),
        }
    }

    /// Create a collector error
    pub fn collector(stream_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collector {
            stream_id: stream_id.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the action and path that failed
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context: format!("{} '{}'", action, path.display()),
            source,
        }
    }

    /// True for errors that mean "reset the entry and refetch"
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(self, Self::CorruptEntry { .. })
    }
}

pub type KirinukiResult<T> = Result<T, KirinukiError>;
