//! チャット取得元とのインターフェース
//!
//! ネットワーク経由の取得はこのクレートの外側にあり、`ChatCollector`を実装して渡す。
//! 同梱の`NdjsonCollector`は保存済みのチャットダンプから読み込む。

use crate::error::{KirinukiError, KirinukiResult};
use crate::io::ndjson;
use crate::models::{Message, StreamMetadata};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 1回の取得結果
#[derive(Debug, Clone, PartialEq)]
pub struct ChatBatch {
    /// タイムスタンプ順のメッセージ
    pub messages: Vec<Message>,
    pub metadata: StreamMetadata,
    /// 配信末尾まで取得できたか
    pub reached_end: bool,
}

/// チャット取得元
pub trait ChatCollector: Send + Sync {
    /// 先頭から最大`limit`件取得
    fn collect(&self, stream_id: &str, limit: Option<usize>) -> KirinukiResult<ChatBatch>;

    /// `after`秒より後のメッセージを最大`limit`件取得（上限付きキャッシュの補完用）
    fn collect_after(
        &self,
        stream_id: &str,
        after: f64,
        limit: Option<usize>,
    ) -> KirinukiResult<ChatBatch>;
}

/// NDJSONチャットダンプから読み込む取得元
///
/// `<dir>/<stream_id>.ndjson`と、あれば`<dir>/<stream_id>.meta.json`を読む。
#[derive(Debug, Clone)]
pub struct NdjsonCollector {
    dir: PathBuf,
    file: Option<PathBuf>,
}

impl NdjsonCollector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
        }
    }

    /// 配信IDに関係なく1つのダンプファイルを読む
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let file = path.into();
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            dir,
            file: Some(file),
        }
    }

    pub fn dump_path(&self, stream_id: &str) -> PathBuf {
        match &self.file {
            Some(file) => file.clone(),
            None => self.dir.join(format!("{}.ndjson", stream_id)),
        }
    }

    fn load(&self, stream_id: &str) -> KirinukiResult<(Vec<Message>, StreamMetadata)> {
        let path = self.dump_path(stream_id);
        let mut messages = ndjson::read_messages(&path)
            .map_err(|e| KirinukiError::collector(stream_id, e.to_string()))?;
        messages.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let meta_path = ndjson::metadata_path_for(&path);
        let mut metadata = if meta_path.exists() {
            ndjson::read_metadata(&meta_path)
                .map_err(|e| KirinukiError::collector(stream_id, e.to_string()))?
        } else {
            StreamMetadata::new(stream_id, 0)
        };
        metadata.stream_id = stream_id.to_string();

        debug!(
            stream_id = %stream_id,
            path = %path.display(),
            messages = messages.len(),
            "Loaded chat dump"
        );
        Ok((messages, metadata))
    }
}

fn capped_batch(
    mut messages: Vec<Message>,
    mut metadata: StreamMetadata,
    limit: Option<usize>,
) -> ChatBatch {
    let reached_end = match limit {
        Some(limit) if messages.len() > limit => {
            messages.truncate(limit);
            false
        }
        _ => true,
    };
    metadata.is_complete = reached_end;
    metadata.message_limit = limit;
    ChatBatch {
        messages,
        metadata,
        reached_end,
    }
}

impl ChatCollector for NdjsonCollector {
    fn collect(&self, stream_id: &str, limit: Option<usize>) -> KirinukiResult<ChatBatch> {
        let (messages, metadata) = self.load(stream_id)?;
        Ok(capped_batch(messages, metadata, limit))
    }

    fn collect_after(
        &self,
        stream_id: &str,
        after: f64,
        limit: Option<usize>,
    ) -> KirinukiResult<ChatBatch> {
        let (messages, metadata) = self.load(stream_id)?;
        let later = messages
            .into_iter()
            .filter(|message| message.timestamp > after)
            .collect();
        Ok(capped_batch(later, metadata, limit))
    }
}
