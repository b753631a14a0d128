//! On-disk encoding of one cache entry.
//!
//! An entry directory holds exactly two files: the gzip-compressed message
//! blob and the JSON metadata record. Every write goes through a temporary
//! file in the same directory followed by a rename, so a crash mid-write
//! leaves a `*.tmp` orphan instead of a truncated blob.

use crate::error::{KirinukiError, KirinukiResult};
use crate::models::{Message, StreamMetadata};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

pub const BLOB_FILE_NAME: &str = "messages.json.gz";
/// Decompressed blob left behind by an interrupted export or manual edit
pub const PLAIN_BLOB_FILE_NAME: &str = "messages.json";
pub const RECORD_FILE_NAME: &str = "metadata.json";
pub const TEMP_SUFFIX: &str = ".tmp";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Metadata record stored next to the blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord {
    pub metadata: StreamMetadata,
    /// Number of messages in the blob
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(metadata: StreamMetadata, message_count: usize) -> Self {
        let now = Utc::now();
        Self {
            metadata,
            message_count,
            created_at: now,
            last_access_time: now,
        }
    }

    /// Plausibility of the completeness flags against the blob size
    pub fn inconsistency(&self, blob_message_count: usize) -> Option<String> {
        if let Some(limit) = self.metadata.message_limit {
            if blob_message_count > limit {
                return Some(format!(
                    "{} messages cached but the fetch was capped at {}",
                    blob_message_count, limit
                ));
            }
        }
        None
    }
}

/// Paths of the files that make up one entry
#[derive(Debug, Clone)]
pub struct EntryPaths {
    pub dir: PathBuf,
    pub blob: PathBuf,
    pub plain_blob: PathBuf,
    pub record: PathBuf,
}

impl EntryPaths {
    pub fn new(root: &Path, stream_id: &str) -> Self {
        let dir = root.join(stream_id);
        Self {
            blob: dir.join(BLOB_FILE_NAME),
            plain_blob: dir.join(PLAIN_BLOB_FILE_NAME),
            record: dir.join(RECORD_FILE_NAME),
            dir,
        }
    }
}

/// Serialize and gzip a message set
pub fn encode_messages(messages: &[Message]) -> KirinukiResult<Vec<u8>> {
    let json = serde_json::to_vec(messages)?;
    compress(&json)
}

pub fn compress(bytes: &[u8]) -> KirinukiResult<Vec<u8>> {
    let to_error = |e: io::Error| KirinukiError::Io {
        context: "compressing message blob".to_string(),
        source: e,
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(to_error)?;
    encoder.finish().map_err(to_error)
}

/// Gunzip and parse a message blob. Any failure is reported as `InvalidData`.
pub fn decode_messages(bytes: &[u8]) -> io::Result<Vec<Message>> {
    if bytes.len() < GZIP_MAGIC.len() || bytes[..2] != GZIP_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "blob is not gzip-compressed",
        ));
    }
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    parse_plain_messages(&json)
}

/// Parse an uncompressed JSON message array
pub fn parse_plain_messages(bytes: &[u8]) -> io::Result<Vec<Message>> {
    serde_json::from_slice(bytes).map_err(io::Error::from)
}

pub fn read_record(path: &Path) -> KirinukiResult<CacheRecord> {
    let bytes = fs::read(path).map_err(|e| KirinukiError::io("reading", path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn write_record(path: &Path, record: &CacheRecord) -> KirinukiResult<()> {
    let bytes = serde_json::to_vec_pretty(record)?;
    write_atomic(path, &bytes)
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> KirinukiResult<()> {
    let tmp = temp_path_for(path);
    let result = (|| -> io::Result<()> {
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(KirinukiError::io("writing", path, e));
    }
    Ok(())
}

pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Total size of the regular files in a directory
pub fn dir_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|entry| entry.metadata().ok())
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len())
                .sum()
        })
        .unwrap_or(0)
}
