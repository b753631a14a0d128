//! キャッシュエントリの整合性チェック
//!
//! エントリディレクトリの形（blobとメタデータ記録の2ファイル）を検証し、
//! データを失わずに直せる軽微な不整合はその場で修復する。

use super::blob::{
    self, CacheRecord, EntryPaths, BLOB_FILE_NAME, PLAIN_BLOB_FILE_NAME, RECORD_FILE_NAME,
};
use crate::error::{KirinukiError, KirinukiResult};
use crate::models::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 修復不能な破損の種類
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Corruption {
    /// エントリディレクトリが存在しない
    MissingEntry,
    /// メッセージblobがない（復元手段なし）
    MissingBlob,
    /// メタデータ記録がない（復元手段なし）
    MissingRecord,
    /// blobを展開・解析できない
    UndecodableBlob(String),
    /// メタデータ記録を解析できない
    UnparsableRecord(String),
    /// メタデータとblobの内容が矛盾している
    Inconsistent(String),
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corruption::MissingEntry => write!(f, "entry directory is missing"),
            Corruption::MissingBlob => write!(f, "message blob is missing"),
            Corruption::MissingRecord => write!(f, "metadata record is missing"),
            Corruption::UndecodableBlob(reason) => {
                write!(f, "message blob cannot be decoded: {}", reason)
            }
            Corruption::UnparsableRecord(reason) => {
                write!(f, "metadata record cannot be parsed: {}", reason)
            }
            Corruption::Inconsistent(reason) => write!(f, "inconsistent entry: {}", reason),
        }
    }
}

/// 自動で行った修復
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repair {
    /// 展開されたままのblobを圧縮し直した
    CompressedPlainBlob,
    /// 対になるファイルを持たない余分なファイルを削除した
    RemovedOrphan(String),
    /// 記録上のメッセージ数をblobに合わせた
    RewroteMessageCount { recorded: usize, actual: usize },
}

/// チェック結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Healthy,
    Repaired(Vec<Repair>),
    Corrupt(Corruption),
}

impl IntegrityStatus {
    /// そのまま読み出してよい状態か
    pub fn is_usable(&self) -> bool {
        !matches!(self, IntegrityStatus::Corrupt(_))
    }
}

/// チェックの結果と、使える場合は読み込んだ内容
#[derive(Debug)]
pub(crate) struct Inspection {
    pub status: IntegrityStatus,
    pub loaded: Option<(Vec<Message>, CacheRecord)>,
}

impl Inspection {
    fn corrupt(stream_id: &str, corruption: Corruption) -> Self {
        warn!(stream_id = %stream_id, reason = %corruption, "🧨 Cache entry is corrupt");
        Self {
            status: IntegrityStatus::Corrupt(corruption),
            loaded: None,
        }
    }
}

/// 整合性チェッカー
///
/// ロックは取らない。エントリ単位の排他は`CacheStore`側の責務。
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    root: PathBuf,
}

impl IntegrityChecker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// エントリを検証し、必要なら修復する
    pub fn check(&self, stream_id: &str) -> KirinukiResult<IntegrityStatus> {
        Ok(self.inspect(stream_id)?.status)
    }

    /// 全エントリを検証
    pub fn check_all(&self) -> KirinukiResult<Vec<(String, IntegrityStatus)>> {
        let mut results = Vec::new();
        for stream_id in list_entry_dirs(&self.root)? {
            let status = self.check(&stream_id)?;
            results.push((stream_id, status));
        }
        Ok(results)
    }

    pub(crate) fn inspect(&self, stream_id: &str) -> KirinukiResult<Inspection> {
        let paths = EntryPaths::new(&self.root, stream_id);
        if !paths.dir.is_dir() {
            return Ok(Inspection::corrupt(stream_id, Corruption::MissingEntry));
        }

        let mut has_blob = false;
        let mut has_plain = false;
        let mut has_record = false;
        let mut orphans = Vec::new();

        let listing =
            fs::read_dir(&paths.dir).map_err(|e| KirinukiError::io("listing", &paths.dir, e))?;
        for entry in listing {
            let entry = entry.map_err(|e| KirinukiError::io("listing", &paths.dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            match name.as_str() {
                BLOB_FILE_NAME if is_file => has_blob = true,
                PLAIN_BLOB_FILE_NAME if is_file => has_plain = true,
                RECORD_FILE_NAME if is_file => has_record = true,
                _ => orphans.push(entry.path()),
            }
        }

        // 片方が欠けたペアは復元できない
        if !has_record {
            return Ok(Inspection::corrupt(stream_id, Corruption::MissingRecord));
        }
        if !has_blob && !has_plain {
            return Ok(Inspection::corrupt(stream_id, Corruption::MissingBlob));
        }

        let record = match blob::read_record(&paths.record) {
            Ok(record) => record,
            Err(KirinukiError::Json(e)) => {
                return Ok(Inspection::corrupt(
                    stream_id,
                    Corruption::UnparsableRecord(e.to_string()),
                ))
            }
            Err(e) => return Err(e),
        };
        if record.metadata.stream_id != stream_id {
            return Ok(Inspection::corrupt(
                stream_id,
                Corruption::Inconsistent(format!(
                    "record belongs to '{}'",
                    record.metadata.stream_id
                )),
            ));
        }

        let (messages, source) = match self.load_messages(&paths, has_blob, has_plain)? {
            Ok(loaded) => loaded,
            Err(corruption) => return Ok(Inspection::corrupt(stream_id, corruption)),
        };

        if let Some(reason) = record.inconsistency(messages.len()) {
            return Ok(Inspection::corrupt(stream_id, Corruption::Inconsistent(reason)));
        }

        // ここから先は修復のみ
        let mut repairs = Vec::new();
        match source {
            BlobSource::Compressed { stale_plain: true } => {
                remove_orphan(&paths.plain_blob)?;
                repairs.push(Repair::RemovedOrphan(PLAIN_BLOB_FILE_NAME.to_string()));
            }
            BlobSource::Compressed { stale_plain: false } => {}
            BlobSource::Plain(bytes) => {
                let compressed = blob::compress(&bytes)?;
                blob::write_atomic(&paths.blob, &compressed)?;
                fs::remove_file(&paths.plain_blob)
                    .map_err(|e| KirinukiError::io("removing", &paths.plain_blob, e))?;
                repairs.push(Repair::CompressedPlainBlob);
            }
        }

        for orphan in orphans {
            remove_orphan(&orphan)?;
            let name = orphan
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            repairs.push(Repair::RemovedOrphan(name));
        }

        let mut record = record;
        if record.message_count != messages.len() {
            repairs.push(Repair::RewroteMessageCount {
                recorded: record.message_count,
                actual: messages.len(),
            });
            record.message_count = messages.len();
            blob::write_record(&paths.record, &record)?;
        }

        let status = if repairs.is_empty() {
            debug!(stream_id = %stream_id, "✅ Cache entry is healthy");
            IntegrityStatus::Healthy
        } else {
            info!(stream_id = %stream_id, repairs = ?repairs, "🔧 Cache entry repaired");
            IntegrityStatus::Repaired(repairs)
        };

        Ok(Inspection {
            status,
            loaded: Some((messages, record)),
        })
    }

    /// blobを読み込む（ファイルは変更しない）
    fn load_messages(
        &self,
        paths: &EntryPaths,
        has_blob: bool,
        has_plain: bool,
    ) -> KirinukiResult<Result<(Vec<Message>, BlobSource), Corruption>> {
        let mut blob_error = None;

        if has_blob {
            let bytes =
                fs::read(&paths.blob).map_err(|e| KirinukiError::io("reading", &paths.blob, e))?;
            match blob::decode_messages(&bytes) {
                Ok(messages) => {
                    return Ok(Ok((
                        messages,
                        BlobSource::Compressed {
                            stale_plain: has_plain,
                        },
                    )))
                }
                Err(e) => blob_error = Some(e.to_string()),
            }
        }

        if has_plain {
            let bytes = fs::read(&paths.plain_blob)
                .map_err(|e| KirinukiError::io("reading", &paths.plain_blob, e))?;
            if let Ok(messages) = blob::parse_plain_messages(&bytes) {
                return Ok(Ok((messages, BlobSource::Plain(bytes))));
            }
        }

        Ok(Err(Corruption::UndecodableBlob(
            blob_error.unwrap_or_else(|| "decompressed blob is not valid JSON".to_string()),
        )))
    }
}

/// メッセージを読み出したblobの種類
enum BlobSource {
    Compressed { stale_plain: bool },
    /// 展開済みblobの中身（圧縮し直す）
    Plain(Vec<u8>),
}

fn remove_orphan(path: &Path) -> KirinukiResult<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| KirinukiError::io("removing", path, e))
}

/// ルート直下のエントリディレクトリ名を列挙
pub(crate) fn list_entry_dirs(root: &Path) -> KirinukiResult<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    let listing = fs::read_dir(root).map_err(|e| KirinukiError::io("listing", root, e))?;
    for entry in listing.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            ids.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamMetadata;
    use tempfile::TempDir;

    fn write_entry(root: &Path, stream_id: &str, messages: &[Message]) -> EntryPaths {
        let paths = EntryPaths::new(root, stream_id);
        fs::create_dir_all(&paths.dir).unwrap();
        let blob_bytes = blob::encode_messages(messages).unwrap();
        blob::write_atomic(&paths.blob, &blob_bytes).unwrap();
        let record = CacheRecord::new(StreamMetadata::new(stream_id, 600), messages.len());
        blob::write_record(&paths.record, &record).unwrap();
        paths
    }

    fn messages() -> Vec<Message> {
        vec![
            Message::new(1.0, "UC1", "alice", "hello"),
            Message::new(2.0, "UC2", "bob", "lol"),
        ]
    }

    #[test]
    fn test_healthy_entry() {
        let temp_dir = TempDir::new().unwrap();
        write_entry(temp_dir.path(), "abc", &messages());

        let checker = IntegrityChecker::new(temp_dir.path());
        assert_eq!(checker.check("abc").unwrap(), IntegrityStatus::Healthy);
    }

    #[test]
    fn test_missing_entry_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let checker = IntegrityChecker::new(temp_dir.path());
        assert_eq!(
            checker.check("nothing").unwrap(),
            IntegrityStatus::Corrupt(Corruption::MissingEntry)
        );
    }

    #[test]
    fn test_plain_blob_is_compressed() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_entry(temp_dir.path(), "abc", &messages());
        fs::remove_file(&paths.blob).unwrap();
        fs::write(&paths.plain_blob, serde_json::to_vec(&messages()).unwrap()).unwrap();

        let checker = IntegrityChecker::new(temp_dir.path());
        assert_eq!(
            checker.check("abc").unwrap(),
            IntegrityStatus::Repaired(vec![Repair::CompressedPlainBlob])
        );
        assert!(paths.blob.exists());
        assert!(!paths.plain_blob.exists());
        assert_eq!(checker.check("abc").unwrap(), IntegrityStatus::Healthy);
    }

    #[test]
    fn test_orphan_files_are_removed() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_entry(temp_dir.path(), "abc", &messages());
        fs::write(paths.dir.join("messages.json.gz.tmp"), b"partial").unwrap();

        let checker = IntegrityChecker::new(temp_dir.path());
        assert_eq!(
            checker.check("abc").unwrap(),
            IntegrityStatus::Repaired(vec![Repair::RemovedOrphan(
                "messages.json.gz.tmp".to_string()
            )])
        );
        assert_eq!(fs::read_dir(&paths.dir).unwrap().count(), 2);
    }

    #[test]
    fn test_missing_record_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_entry(temp_dir.path(), "abc", &messages());
        fs::remove_file(&paths.record).unwrap();

        let checker = IntegrityChecker::new(temp_dir.path());
        assert_eq!(
            checker.check("abc").unwrap(),
            IntegrityStatus::Corrupt(Corruption::MissingRecord)
        );
        // 破損エントリは触らない
        assert!(paths.blob.exists());
    }

    #[test]
    fn test_garbage_blob_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_entry(temp_dir.path(), "abc", &messages());
        fs::write(&paths.blob, b"\x1f\x8bnot really gzip").unwrap();

        let checker = IntegrityChecker::new(temp_dir.path());
        assert!(matches!(
            checker.check("abc").unwrap(),
            IntegrityStatus::Corrupt(Corruption::UndecodableBlob(_))
        ));
    }

    #[test]
    fn test_unparsable_record_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_entry(temp_dir.path(), "abc", &messages());
        fs::write(&paths.record, b"{ not json").unwrap();

        let checker = IntegrityChecker::new(temp_dir.path());
        assert!(matches!(
            checker.check("abc").unwrap(),
            IntegrityStatus::Corrupt(Corruption::UnparsableRecord(_))
        ));
    }

    #[test]
    fn test_message_count_mismatch_is_repaired() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_entry(temp_dir.path(), "abc", &messages());
        let mut record = blob::read_record(&paths.record).unwrap();
        record.message_count = 99;
        blob::write_record(&paths.record, &record).unwrap();

        let checker = IntegrityChecker::new(temp_dir.path());
        assert_eq!(
            checker.check("abc").unwrap(),
            IntegrityStatus::Repaired(vec![Repair::RewroteMessageCount {
                recorded: 99,
                actual: 2
            }])
        );
        assert_eq!(blob::read_record(&paths.record).unwrap().message_count, 2);
    }

    #[test]
    fn test_check_all() {
        let temp_dir = TempDir::new().unwrap();
        write_entry(temp_dir.path(), "a", &messages());
        let broken = write_entry(temp_dir.path(), "b", &messages());
        fs::remove_file(&broken.blob).unwrap();

        let checker = IntegrityChecker::new(temp_dir.path());
        let results = checker.check_all().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], ("a".to_string(), IntegrityStatus::Healthy));
        assert_eq!(
            results[1],
            ("b".to_string(), IntegrityStatus::Corrupt(Corruption::MissingBlob))
        );
    }
}
