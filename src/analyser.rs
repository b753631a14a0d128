//! 配信解析のエントリポイント
//!
//! キャッシュ参照 → 整合性チェック → 頻度解析 → 注釈付けを順に実行し、
//! 検索・絞り込み用の`StreamAnalysis`を返す。

use crate::analytics::{
    ContextResolver, HighlightAnnotator, KeywordExtractor, SignalEngine,
};
use crate::cache::CacheStore;
use crate::collector::ChatCollector;
use crate::config::AnalyserConfig;
use crate::error::{KirinukiError, KirinukiResult};
use crate::models::{Highlight, Message, StreamMetadata};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// ハイライトの絞り込み条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HighlightFilter {
    /// 空でなければ、いずれかのコンテキストを持つものだけ
    pub include: Vec<String>,
    /// いずれかのコンテキストを持つものを除外（`include`より優先）
    pub exclude: Vec<String>,
    /// 除外する強さレベル名
    pub skip_intensities: Vec<String>,
    /// 上位N件
    pub top: Option<usize>,
}

impl HighlightFilter {
    pub fn top(n: usize) -> Self {
        Self {
            top: Some(n),
            ..Default::default()
        }
    }

    pub fn matches(&self, highlight: &Highlight) -> bool {
        if highlight
            .contexts
            .iter()
            .any(|context| self.exclude.contains(context))
        {
            return false;
        }
        if !self.include.is_empty()
            && !highlight
                .contexts
                .iter()
                .any(|context| self.include.contains(context))
        {
            return false;
        }
        !self.skip_intensities.contains(&highlight.intensity.name)
    }
}

/// ユーザー検索条件（同名ユーザーがいるためIDの方が確実）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    Id(String),
    Name(String),
}

/// チャット投稿者
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Author {
    pub id: String,
    pub name: String,
}

/// 1配信分の解析結果
#[derive(Debug, Clone)]
pub struct StreamAnalysis {
    metadata: StreamMetadata,
    messages: Vec<Message>,
    highlights: Vec<Highlight>,
    keywords: KeywordExtractor,
}

impl StreamAnalysis {
    pub fn stream_id(&self) -> &str {
        &self.metadata.stream_id
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 検出順（開始時刻の昇順）のハイライト
    pub fn all_highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    /// 条件に合うハイライトをfdeltaの降順で返す
    pub fn highlights(&self, filter: &HighlightFilter) -> Vec<&Highlight> {
        let mut selected: Vec<&Highlight> = self
            .highlights
            .iter()
            .filter(|highlight| filter.matches(highlight))
            .collect();
        selected.sort_by(|a, b| b.fdelta.total_cmp(&a.fdelta));
        if let Some(top) = filter.top {
            selected.truncate(top);
        }
        selected
    }

    /// 上位N件のハイライト
    pub fn summary(&self, top: usize) -> Vec<&Highlight> {
        self.highlights(&HighlightFilter::top(top))
    }

    /// フレーズを含む（`exact`なら一致する）メッセージ
    pub fn find_messages(&self, phrase: &str, exact: bool, ignore_case: bool) -> Vec<&Message> {
        let needle = if ignore_case {
            phrase.to_lowercase()
        } else {
            phrase.to_string()
        };
        debug!(phrase = %phrase, exact = exact, ignore_case = ignore_case, "Finding messages");

        self.messages
            .iter()
            .filter(|message| {
                let text = if ignore_case {
                    message.text.to_lowercase()
                } else {
                    message.text.clone()
                };
                if exact {
                    text == needle
                } else {
                    text.contains(&needle)
                }
            })
            .collect()
    }

    pub fn find_user_messages(&self, query: &UserQuery) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|message| match query {
                UserQuery::Id(id) => &message.author_id == id,
                UserQuery::Name(name) => &message.author_name == name,
            })
            .collect()
    }

    /// 最頻出の正規化済みフレーズ（`exclude`の語を除く）
    pub fn most_used_phrase(&self, exclude: &[&str]) -> Option<(String, usize)> {
        self.keywords
            .most_used(self.messages.iter().map(|message| message.text.as_str()), exclude)
    }

    /// 投稿者一覧（初出順）
    pub fn authors(&self) -> Vec<Author> {
        let mut seen = HashSet::new();
        self.messages
            .iter()
            .filter(|message| seen.insert(message.author_id.as_str()))
            .map(|message| Author {
                id: message.author_id.clone(),
                name: message.author_name.clone(),
            })
            .collect()
    }
}

/// 配信解析器
pub struct StreamAnalyser {
    config: AnalyserConfig,
    cache: Arc<CacheStore>,
    collector: Arc<dyn ChatCollector>,
    resolver: ContextResolver,
    engine: SignalEngine,
    annotator: HighlightAnnotator,
}

impl StreamAnalyser {
    /// 設定を検証し、コンテキスト定義を読み込んで解析器を作る
    pub fn new(
        config: AnalyserConfig,
        cache: Arc<CacheStore>,
        collector: Arc<dyn ChatCollector>,
    ) -> KirinukiResult<Self> {
        config.validate()?;
        let resolver = ContextResolver::from_config(&config.contexts)?;
        let engine = SignalEngine::new(config.signal.clone());
        let annotator = HighlightAnnotator::new(config.keywords.clone(), &config.intensity)?
            .with_filters(config.highlights.clone());
        Ok(Self {
            config,
            cache,
            collector,
            resolver,
            engine,
            annotator,
        })
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn contexts(&self) -> &ContextResolver {
        &self.resolver
    }

    /// コンテキスト定義の追加・削除用
    pub fn contexts_mut(&mut self) -> &mut ContextResolver {
        &mut self.resolver
    }

    /// 配信を解析する
    pub fn analyse(&self, stream_id: &str) -> KirinukiResult<StreamAnalysis> {
        info!(stream_id = %stream_id, "🔍 Analysing stream");
        let (messages, metadata) = self.load(stream_id)?;
        let highlights = self.detect(&messages, &metadata)?;
        info!(
            stream_id = %stream_id,
            messages = messages.len(),
            highlights = highlights.len(),
            "✅ Analysis finished"
        );
        Ok(StreamAnalysis {
            metadata,
            messages,
            highlights,
            keywords: self.annotator.keywords().clone(),
        })
    }

    /// キャッシュからメッセージを読み、なければ取得して保存する
    ///
    /// 破損エントリはリセットして取得し直す。上限付きで途中までしかない場合は続きを取得して追記する。
    pub fn load(&self, stream_id: &str) -> KirinukiResult<(Vec<Message>, StreamMetadata)> {
        let cached = match self.cache.get(stream_id) {
            Ok(entry) => entry,
            Err(e) if e.is_corrupt_entry() => {
                warn!(stream_id = %stream_id, "Resetting corrupt cache entry: {}", e);
                self.cache.reset(stream_id)?;
                None
            }
            Err(e) => return Err(e),
        };

        let Some(entry) = cached else {
            let batch = self.collector.collect(stream_id, self.config.message_limit)?;
            self.cache
                .put(stream_id, &batch.messages, batch.metadata.clone())?;
            let mut metadata = batch.metadata;
            metadata.stream_id = stream_id.to_string();
            return Ok((batch.messages, metadata));
        };

        if !entry.is_incomplete() {
            return Ok((entry.messages, entry.metadata));
        }

        let remaining = self
            .config
            .message_limit
            .map(|limit| limit.saturating_sub(entry.messages.len()));
        if remaining == Some(0) {
            debug!(stream_id = %stream_id, "Cached prefix already covers the message limit");
            return Ok((entry.messages, entry.metadata));
        }

        let after = entry.max_timestamp().unwrap_or(f64::NEG_INFINITY);
        info!(stream_id = %stream_id, after = after, "⏩ Fetching the rest of an incomplete chat");
        let batch = self.collector.collect_after(stream_id, after, remaining)?;
        self.cache
            .append_messages(stream_id, batch.messages, batch.reached_end)?;

        match self.cache.get(stream_id)? {
            Some(entry) => Ok((entry.messages, entry.metadata)),
            None => Err(KirinukiError::collector(
                stream_id,
                "cache entry disappeared after appending messages",
            )),
        }
    }

    /// メッセージ列からハイライトを検出する
    ///
    /// タイムスタンプが不正な場合はハイライトなしとして扱う。
    pub fn detect(
        &self,
        messages: &[Message],
        metadata: &StreamMetadata,
    ) -> KirinukiResult<Vec<Highlight>> {
        let analysis = match self.engine.detect(messages, metadata.duration_seconds) {
            Ok(analysis) => analysis,
            Err(KirinukiError::PipelineInput { reason }) => {
                warn!(stream_id = %metadata.stream_id, "No highlights: {}", reason);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        Ok(self
            .annotator
            .annotate(&analysis.intervals, messages, &self.resolver))
    }
}
