//! 圧縮チャットキャッシュ
//!
//! 配信IDごとに1ディレクトリ（圧縮blob＋メタデータ記録）を持つディスクキャッシュ。
//! 書き込みはすべて一時ファイル経由のrenameで行い、読み出し前には必ず整合性チェックを通す。

pub mod blob;
pub mod eviction;
pub mod integrity;

pub use eviction::{
    EntryStats, EvictionPolicy, EvictionStrategy, FirstInFirstOut, LeastRecentlyUsed,
    MostRecentlyUsed, RandomReplacement,
};
pub use integrity::{Corruption, IntegrityChecker, IntegrityStatus, Repair};

use crate::config::CacheConfig;
use crate::error::{KirinukiError, KirinukiResult};
use crate::models::{Message, StreamMetadata};
use blob::{CacheRecord, EntryPaths};
use chrono::{DateTime, Utc};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// キャッシュから読み出した配信データ
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub messages: Vec<Message>,
    pub metadata: StreamMetadata,
    pub created_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    /// ディスク上のバイト数
    pub size: u64,
}

impl CacheEntry {
    /// 上限付き取得による先頭部分のみか（追加取得が必要）
    pub fn is_incomplete(&self) -> bool {
        !self.metadata.is_complete
    }

    /// キャッシュ済みメッセージの最大タイムスタンプ
    pub fn max_timestamp(&self) -> Option<f64> {
        max_timestamp(&self.messages)
    }
}

/// 配信ごとのディスクキャッシュ
///
/// 同じ配信IDへの変更操作はエントリ単位のロックで直列化される。異なる配信へのアクセスは
/// 並行して行える。エントリ数の確認から削除・作成までは容量ガードの中で行う。
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    cache_limit: Option<usize>,
    policy: Box<dyn EvictionPolicy>,
    checker: IntegrityChecker,
    locks: LockRegistry,
    capacity: Mutex<()>,
}

impl CacheStore {
    /// 設定からキャッシュを開く（ルートディレクトリがなければ作成）
    pub fn new(config: &CacheConfig) -> KirinukiResult<Self> {
        let root = config.resolved_root()?;
        Self::with_policy(root, config.cache_limit, config.eviction.into_policy())
    }

    pub fn with_policy(
        root: impl Into<PathBuf>,
        cache_limit: Option<usize>,
        policy: Box<dyn EvictionPolicy>,
    ) -> KirinukiResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| KirinukiError::io("creating", &root, e))?;
        debug!(
            root = %root.display(),
            limit = ?cache_limit,
            policy = policy.name(),
            "📦 Cache store opened"
        );
        Ok(Self {
            checker: IntegrityChecker::new(root.clone()),
            root,
            cache_limit,
            policy,
            locks: Mutex::new(HashMap::new()),
            capacity: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_limit(&self) -> Option<usize> {
        self.cache_limit
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn checker(&self) -> &IntegrityChecker {
        &self.checker
    }

    fn entry_lock(&self, stream_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// エントリのロックを取得する（解放時に未使用なら登録から外す）
    fn lock_entry(&self, stream_id: &str) -> EntryGuard<'_> {
        let guard = self.entry_lock(stream_id).lock_arc();
        EntryGuard {
            locks: &self.locks,
            stream_id: stream_id.to_string(),
            guard: Some(guard),
        }
    }

    /// 使用中なら`None`
    fn try_lock_entry(&self, stream_id: &str) -> Option<EntryGuard<'_>> {
        let lock = self.entry_lock(stream_id);
        match lock.try_lock_arc() {
            Some(guard) => Some(EntryGuard {
                locks: &self.locks,
                stream_id: stream_id.to_string(),
                guard: Some(guard),
            }),
            None => {
                let mut locks = self.locks.lock();
                drop(lock);
                prune_lock(&mut locks, stream_id);
                None
            }
        }
    }

    fn paths(&self, stream_id: &str) -> KirinukiResult<EntryPaths> {
        validate_stream_id(stream_id)?;
        Ok(EntryPaths::new(&self.root, stream_id))
    }

    /// エントリを読み出す
    ///
    /// 存在しなければ`Ok(None)`。整合性チェックで破損と判定された場合は
    /// `KirinukiError::CorruptEntry`を返す（呼び出し側で`reset`して再取得する）。
    pub fn get(&self, stream_id: &str) -> KirinukiResult<Option<CacheEntry>> {
        let paths = self.paths(stream_id)?;
        let _entry = self.lock_entry(stream_id);

        if !paths.dir.exists() {
            debug!(stream_id = %stream_id, "Cache miss");
            return Ok(None);
        }

        let inspection = self.checker.inspect(stream_id)?;
        let (messages, mut record) = match (inspection.status, inspection.loaded) {
            (IntegrityStatus::Corrupt(reason), _) => {
                return Err(KirinukiError::corrupt(stream_id, reason))
            }
            (_, Some(loaded)) => loaded,
            (_, None) => return Err(KirinukiError::corrupt(stream_id, Corruption::MissingBlob)),
        };

        record.last_access_time = Utc::now();
        blob::write_record(&paths.record, &record)?;

        debug!(
            stream_id = %stream_id,
            messages = messages.len(),
            complete = record.metadata.is_complete,
            "📖 Cache hit"
        );

        Ok(Some(CacheEntry {
            messages,
            metadata: record.metadata,
            created_at: record.created_at,
            last_access_time: record.last_access_time,
            size: blob::dir_size(&paths.dir),
        }))
    }

    /// メッセージとメタデータを保存する
    ///
    /// 新規エントリで上限を超える場合は書き込み前に削除ポリシーで場所を空ける。
    /// 容量不足で書き込みが失敗することはない。
    pub fn put(
        &self,
        stream_id: &str,
        messages: &[Message],
        metadata: StreamMetadata,
    ) -> KirinukiResult<()> {
        let paths = self.paths(stream_id)?;
        let _capacity = self.capacity.lock();

        if !paths.dir.exists() {
            if let Some(limit) = self.cache_limit {
                while self.entry_count()? >= limit {
                    if self.evict_one(Some(stream_id))?.is_none() {
                        warn!(
                            stream_id = %stream_id,
                            limit = limit,
                            "Every cached entry is in use, writing over the limit"
                        );
                        break;
                    }
                }
            }
        }

        let _entry = self.lock_entry(stream_id);

        let mut metadata = metadata;
        metadata.stream_id = stream_id.to_string();
        // 取得元が上限より多く返した場合も整合する記録にする
        metadata.message_limit = metadata
            .message_limit
            .map(|limit| limit.max(messages.len()));

        let previous = blob::read_record(&paths.record).ok();
        let mut record = CacheRecord::new(metadata, messages.len());
        if let Some(previous) = previous {
            record.created_at = previous.created_at;
        }

        write_entry(&paths, messages, &record)?;
        info!(
            stream_id = %stream_id,
            messages = messages.len(),
            complete = record.metadata.is_complete,
            "💾 Cached stream"
        );
        Ok(())
    }

    /// 削除ポリシーに従って最大1件のエントリを削除する
    ///
    /// 削除したエントリのIDを返す。空の場合や全エントリが使用中の場合は`None`。
    pub fn evict(&self) -> KirinukiResult<Option<String>> {
        let _capacity = self.capacity.lock();
        self.evict_one(None)
    }

    fn evict_one(&self, exclude: Option<&str>) -> KirinukiResult<Option<String>> {
        let mut candidates: Vec<EntryStats> = self
            .entries()?
            .into_iter()
            .filter(|stats| Some(stats.stream_id.as_str()) != exclude)
            .collect();

        while let Some(index) = self.policy.select_victim(&candidates) {
            let victim = candidates.remove(index);
            // 読み書き中のエントリは削除しない
            let Some(_entry) = self.try_lock_entry(&victim.stream_id) else {
                debug!(stream_id = %victim.stream_id, "Skipping in-use entry for eviction");
                continue;
            };

            let dir = self.root.join(&victim.stream_id);
            fs::remove_dir_all(&dir).map_err(|e| KirinukiError::io("evicting", &dir, e))?;
            info!(
                stream_id = %victim.stream_id,
                policy = self.policy.name(),
                "🗑️ Evicted cache entry"
            );
            return Ok(Some(victim.stream_id));
        }
        Ok(None)
    }

    /// エントリを無条件に削除する。削除した場合は`true`
    pub fn reset(&self, stream_id: &str) -> KirinukiResult<bool> {
        let paths = self.paths(stream_id)?;
        let _entry = self.lock_entry(stream_id);

        if !paths.dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&paths.dir).map_err(|e| KirinukiError::io("resetting", &paths.dir, e))?;
        info!(stream_id = %stream_id, "🧹 Cache entry reset");
        Ok(true)
    }

    /// 全エントリを削除し、削除数を返す
    pub fn clear(&self) -> KirinukiResult<usize> {
        let _capacity = self.capacity.lock();
        let mut removed = 0;
        for stream_id in integrity::list_entry_dirs(&self.root)? {
            let _entry = self.lock_entry(&stream_id);
            let dir = self.root.join(&stream_id);
            fs::remove_dir_all(&dir).map_err(|e| KirinukiError::io("clearing", &dir, e))?;
            removed += 1;
        }
        info!(removed = removed, "🧹 Cache cleared");
        Ok(removed)
    }

    /// 追加取得したメッセージを既存エントリに追記する
    ///
    /// 既存の最大タイムスタンプより厳密に新しいメッセージのみを追記し、追記件数を返す。
    /// `reached_end`なら配信末尾まで取得済みとして`is_complete`を立てる。
    pub fn append_messages(
        &self,
        stream_id: &str,
        new_messages: Vec<Message>,
        reached_end: bool,
    ) -> KirinukiResult<usize> {
        let paths = self.paths(stream_id)?;
        let _entry = self.lock_entry(stream_id);

        let inspection = self.checker.inspect(stream_id)?;
        let (mut messages, mut record) = match (inspection.status, inspection.loaded) {
            (IntegrityStatus::Corrupt(reason), _) => {
                return Err(KirinukiError::corrupt(stream_id, reason))
            }
            (_, Some(loaded)) => loaded,
            (_, None) => return Err(KirinukiError::corrupt(stream_id, Corruption::MissingBlob)),
        };

        let cached_max = max_timestamp(&messages);
        let mut fresh: Vec<Message> = new_messages
            .into_iter()
            .filter(|message| cached_max.map_or(true, |max| message.timestamp > max))
            .collect();
        fresh.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let appended = fresh.len();
        messages.extend(fresh);

        record.message_count = messages.len();
        record.metadata.is_complete |= reached_end;
        record.metadata.message_limit = record
            .metadata
            .message_limit
            .map(|limit| limit.max(messages.len()));
        record.last_access_time = Utc::now();

        write_entry(&paths, &messages, &record)?;
        info!(
            stream_id = %stream_id,
            appended = appended,
            total = messages.len(),
            complete = record.metadata.is_complete,
            "➕ Appended messages to cache entry"
        );
        Ok(appended)
    }

    /// キャッシュ済みの配信ID一覧
    pub fn cached_ids(&self) -> KirinukiResult<Vec<String>> {
        integrity::list_entry_dirs(&self.root)
    }

    /// 全エントリの統計情報（記録が読めないエントリは最古扱い）
    pub fn entries(&self) -> KirinukiResult<Vec<EntryStats>> {
        let mut stats = Vec::new();
        for stream_id in integrity::list_entry_dirs(&self.root)? {
            let paths = EntryPaths::new(&self.root, &stream_id);
            let size = blob::dir_size(&paths.dir);
            let entry = match blob::read_record(&paths.record) {
                Ok(record) => EntryStats {
                    stream_id,
                    created_at: record.created_at,
                    last_access_time: record.last_access_time,
                    size,
                    message_count: record.message_count,
                    is_complete: record.metadata.is_complete,
                },
                Err(_) => EntryStats {
                    stream_id,
                    created_at: DateTime::<Utc>::default(),
                    last_access_time: DateTime::<Utc>::default(),
                    size,
                    message_count: 0,
                    is_complete: false,
                },
            };
            stats.push(entry);
        }
        Ok(stats)
    }

    fn entry_count(&self) -> KirinukiResult<usize> {
        Ok(integrity::list_entry_dirs(&self.root)?.len())
    }

    /// 上限を超えている分を削除する（起動時のクリーンアップ用）
    pub fn enforce_limit(&self) -> KirinukiResult<Vec<String>> {
        let Some(limit) = self.cache_limit else {
            return Ok(Vec::new());
        };
        let _capacity = self.capacity.lock();
        let mut evicted = Vec::new();
        while self.entry_count()? > limit {
            match self.evict_one(None)? {
                Some(stream_id) => evicted.push(stream_id),
                None => break,
            }
        }
        Ok(evicted)
    }

    /// 1エントリの整合性チェック（修復を含む）
    pub fn check(&self, stream_id: &str) -> KirinukiResult<IntegrityStatus> {
        self.paths(stream_id)?;
        let _entry = self.lock_entry(stream_id);
        self.checker.check(stream_id)
    }

    /// 全エントリの整合性チェック（エントリごとにロックを取って修復する）
    pub fn check_all(&self) -> KirinukiResult<Vec<(String, IntegrityStatus)>> {
        let mut results = Vec::new();
        for stream_id in integrity::list_entry_dirs(&self.root)? {
            let _entry = self.lock_entry(&stream_id);
            let status = self.checker.check(&stream_id)?;
            results.push((stream_id, status));
        }
        Ok(results)
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }

    /// 全エントリを検査し、修復できないものを削除する。削除したIDを返す
    pub fn enforce_integrity(&self) -> KirinukiResult<Vec<String>> {
        let mut removed = Vec::new();
        for stream_id in integrity::list_entry_dirs(&self.root)? {
            let _entry = self.lock_entry(&stream_id);
            if let IntegrityStatus::Corrupt(reason) = self.checker.check(&stream_id)? {
                let dir = self.root.join(&stream_id);
                fs::remove_dir_all(&dir).map_err(|e| KirinukiError::io("resetting", &dir, e))?;
                warn!(stream_id = %stream_id, reason = %reason, "Removed corrupt cache entry");
                removed.push(stream_id);
            }
        }
        Ok(removed)
    }
}

fn write_entry(paths: &EntryPaths, messages: &[Message], record: &CacheRecord) -> KirinukiResult<()> {
    fs::create_dir_all(&paths.dir).map_err(|e| KirinukiError::io("creating", &paths.dir, e))?;
    let compressed = blob::encode_messages(messages)?;
    blob::write_atomic(&paths.blob, &compressed)?;
    if paths.plain_blob.exists() {
        fs::remove_file(&paths.plain_blob)
            .map_err(|e| KirinukiError::io("removing", &paths.plain_blob, e))?;
    }
    blob::write_record(&paths.record, record)
}

type LockRegistry = Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// 1エントリのロック
struct EntryGuard<'a> {
    locks: &'a LockRegistry,
    stream_id: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        // 登録表を押さえてから解放するので、同時に取得しようとしている側と競合しない
        let mut locks = self.locks.lock();
        drop(self.guard.take());
        prune_lock(&mut locks, &self.stream_id);
    }
}

/// 登録表以外に保持者がいなければ外す
fn prune_lock(locks: &mut HashMap<String, Arc<Mutex<()>>>, stream_id: &str) {
    if locks
        .get(stream_id)
        .map_or(false, |lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(stream_id);
    }
}

fn max_timestamp(messages: &[Message]) -> Option<f64> {
    messages
        .iter()
        .map(|message| message.timestamp)
        .max_by(|a, b| a.total_cmp(b))
}

/// 配信IDはそのままディレクトリ名になるため、パス区切りなどを拒否する
fn validate_stream_id(stream_id: &str) -> KirinukiResult<()> {
    let valid = !stream_id.is_empty()
        && stream_id != "."
        && stream_id != ".."
        && stream_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(KirinukiError::config(
            "stream_id",
            format!("'{}' cannot be used as a cache key", stream_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir, limit: Option<usize>) -> CacheStore {
        CacheStore::with_policy(temp_dir.path(), limit, Box::new(LeastRecentlyUsed)).unwrap()
    }

    fn messages(timestamps: &[f64]) -> Vec<Message> {
        timestamps
            .iter()
            .map(|ts| Message::new(*ts, "UC1", "viewer", format!("message at {}", ts)))
            .collect()
    }

    fn set_last_access(store: &CacheStore, stream_id: &str, offset: i64) {
        let path = EntryPaths::new(store.root(), stream_id).record;
        let mut record = blob::read_record(&path).unwrap();
        record.last_access_time =
            DateTime::<Utc>::default() + Duration::days(1) + Duration::seconds(offset);
        blob::write_record(&path, &record).unwrap();
    }

    #[test]
    fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);

        assert!(store.get("abc").unwrap().is_none());

        store
            .put("abc", &messages(&[1.0, 2.0, 3.0]), StreamMetadata::new("abc", 60))
            .unwrap();
        let entry = store.get("abc").unwrap().unwrap();
        assert_eq!(entry.messages.len(), 3);
        assert_eq!(entry.metadata.stream_id, "abc");
        assert!(!entry.is_incomplete());
        assert!(entry.size > 0);
        assert_eq!(entry.max_timestamp(), Some(3.0));
    }

    #[test]
    fn test_get_updates_last_access_time() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        store.put("abc", &messages(&[1.0]), StreamMetadata::new("abc", 60)).unwrap();
        set_last_access(&store, "abc", 0);

        let entry = store.get("abc").unwrap().unwrap();
        assert!(entry.last_access_time > DateTime::<Utc>::default() + Duration::days(1));
        assert_eq!(store.entries().unwrap()[0].last_access_time, entry.last_access_time);
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        store.put("abc", &messages(&[1.0]), StreamMetadata::new("abc", 60)).unwrap();
        fs::remove_file(EntryPaths::new(store.root(), "abc").record).unwrap();

        let error = store.get("abc").unwrap_err();
        assert!(error.is_corrupt_entry());

        assert!(store.reset("abc").unwrap());
        assert!(store.get("abc").unwrap().is_none());
        assert!(!store.reset("abc").unwrap());
    }

    #[test]
    fn test_evict_removes_exactly_one_lru_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        for (id, offset) in [("a", 30), ("b", 10), ("c", 20)] {
            store.put(id, &messages(&[1.0]), StreamMetadata::new(id, 60)).unwrap();
            set_last_access(&store, id, offset);
        }

        assert_eq!(store.evict().unwrap(), Some("b".to_string()));
        assert_eq!(store.cached_ids().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn test_put_evicts_when_over_limit() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, Some(2));
        for (id, offset) in [("a", 10), ("b", 20)] {
            store.put(id, &messages(&[1.0]), StreamMetadata::new(id, 60)).unwrap();
            set_last_access(&store, id, offset);
        }

        store.put("c", &messages(&[1.0]), StreamMetadata::new("c", 60)).unwrap();
        assert_eq!(store.cached_ids().unwrap(), vec!["b", "c"]);

        // 既存エントリの上書きでは削除しない
        store.put("c", &messages(&[1.0, 2.0]), StreamMetadata::new("c", 60)).unwrap();
        assert_eq!(store.cached_ids().unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_eviction_skips_entry_in_use() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        for (id, offset) in [("a", 10), ("b", 20)] {
            store.put(id, &messages(&[1.0]), StreamMetadata::new(id, 60)).unwrap();
            set_last_access(&store, id, offset);
        }

        let guard = store.lock_entry("a");
        assert_eq!(store.evict().unwrap(), Some("b".to_string()));
        drop(guard);
        assert_eq!(store.cached_ids().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_append_messages_skips_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        let mut metadata = StreamMetadata::new("abc", 60);
        metadata.is_complete = false;
        metadata.message_limit = Some(3);
        store.put("abc", &messages(&[1.0, 2.0, 3.0]), metadata).unwrap();

        let appended = store
            .append_messages("abc", messages(&[2.0, 3.0, 4.0, 5.0]), true)
            .unwrap();
        assert_eq!(appended, 2);

        let entry = store.get("abc").unwrap().unwrap();
        let timestamps: Vec<f64> = entry.messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(!entry.is_incomplete());
        assert_eq!(entry.metadata.message_limit, Some(5));
    }

    #[test]
    fn test_append_to_missing_entry_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        let error = store.append_messages("nothing", messages(&[1.0]), true).unwrap_err();
        assert!(error.is_corrupt_entry());
    }

    #[test]
    fn test_enforce_limit_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        {
            let unbounded = store(&temp_dir, None);
            for (id, offset) in [("a", 10), ("b", 20), ("c", 30)] {
                unbounded.put(id, &messages(&[1.0]), StreamMetadata::new(id, 60)).unwrap();
                set_last_access(&unbounded, id, offset);
            }
        }

        let bounded = store(&temp_dir, Some(1));
        assert_eq!(bounded.enforce_limit().unwrap(), vec!["a", "b"]);
        assert_eq!(bounded.cached_ids().unwrap(), vec!["c"]);
        assert_eq!(bounded.clear().unwrap(), 1);
        assert!(bounded.cached_ids().unwrap().is_empty());
    }

    #[test]
    fn test_enforce_integrity_removes_corrupt_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        store.put("good", &messages(&[1.0]), StreamMetadata::new("good", 60)).unwrap();
        store.put("bad", &messages(&[1.0]), StreamMetadata::new("bad", 60)).unwrap();
        fs::write(EntryPaths::new(store.root(), "bad").blob, b"garbage").unwrap();

        assert_eq!(store.enforce_integrity().unwrap(), vec!["bad"]);
        assert_eq!(store.cached_ids().unwrap(), vec!["good"]);
    }

    #[test]
    fn test_invalid_stream_ids_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        assert!(store.get("../escape").is_err());
        assert!(store.get("").is_err());
        assert!(store.reset("a/b").is_err());
        assert!(store.get("wAPCSnAhhC8").unwrap().is_none());
    }

    #[test]
    fn test_put_accepts_batch_larger_than_its_cap() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        let mut metadata = StreamMetadata::new("abc", 60);
        metadata.is_complete = false;
        metadata.message_limit = Some(1);
        store.put("abc", &messages(&[1.0, 2.0]), metadata).unwrap();

        let entry = store.get("abc").unwrap().unwrap();
        assert_eq!(entry.messages.len(), 2);
        assert_eq!(entry.metadata.message_limit, Some(2));
        assert!(entry.is_incomplete());
        assert_eq!(store.check("abc").unwrap(), IntegrityStatus::Healthy);
    }

    #[test]
    fn test_lock_registry_does_not_grow() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, Some(2));
        for i in 0..10 {
            let id = format!("s{}", i);
            assert!(store.get(&id).unwrap().is_none());
            store.put(&id, &messages(&[1.0]), StreamMetadata::new(&id, 60)).unwrap();
            store.check(&id).unwrap();
        }
        store.reset("s9").unwrap();
        store.evict().unwrap();
        store.check_all().unwrap();
        store.enforce_integrity().unwrap();
        store.clear().unwrap();
        assert_eq!(store.tracked_locks(), 0);

        let guard = store.lock_entry("held");
        assert!(store.try_lock_entry("held").is_none());
        assert_eq!(store.tracked_locks(), 1);
        drop(guard);
        assert_eq!(store.tracked_locks(), 0);
    }

    #[test]
    fn test_check_all_repairs_under_entry_locks() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, None);
        store.put("a", &messages(&[1.0]), StreamMetadata::new("a", 60)).unwrap();
        store.put("b", &messages(&[1.0]), StreamMetadata::new("b", 60)).unwrap();
        fs::write(EntryPaths::new(store.root(), "b").dir.join("stray.tmp"), b"x").unwrap();

        let results = store.check_all().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], ("a".to_string(), IntegrityStatus::Healthy));
        assert_eq!(
            results[1].1,
            IntegrityStatus::Repaired(vec![Repair::RemovedOrphan("stray.tmp".to_string())])
        );
        assert_eq!(store.tracked_locks(), 0);
    }
}
