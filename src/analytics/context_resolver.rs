//! コンテキスト推定
//!
//! キーワードとトリガー語の一致数から「funny」「cute」などのラベルを推定する。
//! 定義は順序付きのソース列として保持し、先に追加されたソースが優先される。

use crate::analytics::keywords::normalize_trigger_phrase;
use crate::cache::blob;
use crate::config::ContextConfig;
use crate::error::{KirinukiError, KirinukiResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// 同梱のデフォルト定義
const BUILTIN_CONTEXTS: &str = include_str!("../../data/contexts.json");
pub const BUILTIN_SOURCE_ID: &str = "builtin";
/// `ContextResolver::add`で追加した定義を入れるソース
pub const USER_SOURCE_ID: &str = "user";

/// トリガー語
///
/// 定義ファイルでは文字列（完全一致）か`{"phrase", "is_exact"}`で書ける。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTrigger")]
pub struct Trigger {
    pub phrase: String,
    pub is_exact: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTrigger {
    Phrase(String),
    Full {
        phrase: String,
        #[serde(default = "default_is_exact")]
        is_exact: bool,
    },
}

fn default_is_exact() -> bool {
    true
}

impl From<RawTrigger> for Trigger {
    fn from(raw: RawTrigger) -> Self {
        match raw {
            RawTrigger::Phrase(phrase) => Trigger::exact(phrase),
            RawTrigger::Full { phrase, is_exact } => Trigger::new(&phrase, is_exact),
        }
    }
}

impl Trigger {
    /// フレーズはキーワードと同じ規則で正規化して持つ
    pub fn new(phrase: &str, is_exact: bool) -> Self {
        Self {
            phrase: normalize_trigger_phrase(phrase, is_exact),
            is_exact,
        }
    }

    pub fn exact(phrase: impl AsRef<str>) -> Self {
        Self::new(phrase.as_ref(), true)
    }

    pub fn inexact(phrase: impl AsRef<str>) -> Self {
        Self::new(phrase.as_ref(), false)
    }

    /// 完全一致、または部分一致（キーワードがフレーズを含む）
    pub fn matches(&self, keyword: &str) -> bool {
        if self.is_exact {
            self.phrase == keyword
        } else {
            keyword.contains(self.phrase.as_str())
        }
    }
}

/// コンテキスト定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDefinition {
    #[serde(rename = "reaction_to", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl ContextDefinition {
    pub fn new(name: impl Into<String>, triggers: Vec<Trigger>) -> Self {
        Self {
            name: name.into(),
            triggers,
        }
    }

    /// いずれかのトリガーに一致したキーワード数
    pub fn overlap(&self, keywords: &[String]) -> usize {
        keywords
            .iter()
            .filter(|keyword| self.triggers.iter().any(|trigger| trigger.matches(keyword)))
            .count()
    }
}

/// 定義ソース（ファイル1つ、または同梱定義など）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSource {
    pub id: String,
    pub definitions: Vec<ContextDefinition>,
}

impl ContextSource {
    pub fn new(id: impl Into<String>, definitions: Vec<ContextDefinition>) -> Self {
        Self {
            id: id.into(),
            definitions,
        }
    }

    /// JSON文字列から読み込む。形式が不正なら`Config`エラー
    pub fn from_json_str(id: impl Into<String>, content: &str) -> KirinukiResult<Self> {
        let id = id.into();
        let definitions: Vec<ContextDefinition> = serde_json::from_str(content)
            .map_err(|e| KirinukiError::config(format!("context source '{}'", id), e.to_string()))?;
        if let Some(unnamed) = definitions.iter().position(|d| d.name.trim().is_empty()) {
            return Err(KirinukiError::config(
                format!("context source '{}'", id),
                format!("definition #{} has an empty name", unnamed),
            ));
        }
        Ok(Self { id, definitions })
    }

    /// ファイルから読み込む（IDはパス）
    pub fn from_path(path: &Path) -> KirinukiResult<Self> {
        let id = path.display().to_string();
        let content = fs::read_to_string(path)
            .map_err(|e| KirinukiError::config(format!("context source '{}'", id), e.to_string()))?;
        Self::from_json_str(id, &content)
    }

    /// 同梱のデフォルト定義
    pub fn builtin() -> KirinukiResult<Self> {
        Self::from_json_str(BUILTIN_SOURCE_ID, BUILTIN_CONTEXTS)
    }
}

/// コンテキスト推定器
#[derive(Debug, Clone)]
pub struct ContextResolver {
    sources: Vec<ContextSource>,
    min_overlap: usize,
}

impl Default for ContextResolver {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ContextResolver {
    pub fn new(min_overlap: usize) -> Self {
        Self {
            sources: Vec::new(),
            min_overlap: min_overlap.max(1),
        }
    }

    /// 設定に従ってソースを読み込む
    ///
    /// 読めないソースは`tolerate_errors`が有効なら警告してスキップ、そうでなければエラー。
    pub fn from_config(config: &ContextConfig) -> KirinukiResult<Self> {
        let mut resolver = Self::new(config.min_overlap);

        let mut loaded = Vec::new();
        for path in &config.sources {
            loaded.push(ContextSource::from_path(path));
        }
        if config.include_builtin {
            loaded.push(ContextSource::builtin());
        }

        for source in loaded {
            match source.and_then(|source| resolver.add_source(source)) {
                Ok(()) => {}
                Err(e) if config.tolerate_errors => {
                    warn!("Skipping context source: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            sources = resolver.sources.len(),
            definitions = resolver.definitions().len(),
            "🏷️ Context resolver ready"
        );
        Ok(resolver)
    }

    pub fn min_overlap(&self) -> usize {
        self.min_overlap
    }

    pub fn sources(&self) -> &[ContextSource] {
        &self.sources
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.iter().all(|source| source.definitions.is_empty())
    }

    /// ソースを末尾（最低優先度）に追加。同じIDがあればエラー
    pub fn add_source(&mut self, source: ContextSource) -> KirinukiResult<()> {
        if self.sources.iter().any(|existing| existing.id == source.id) {
            return Err(KirinukiError::config(
                "contexts.sources",
                format!("source '{}' is already loaded", source.id),
            ));
        }
        debug!(source = %source.id, definitions = source.definitions.len(), "Added context source");
        self.sources.push(source);
        Ok(())
    }

    pub fn remove_source(&mut self, id: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|source| source.id != id);
        before != self.sources.len()
    }

    /// すべてのソースを外す
    pub fn reset(&mut self) {
        self.sources.clear();
    }

    /// 定義を1つ追加（ファイルには書かない）
    pub fn add(&mut self, definition: ContextDefinition) {
        match self
            .sources
            .iter_mut()
            .find(|source| source.id == USER_SOURCE_ID)
        {
            Some(source) => source.definitions.push(definition),
            None => self
                .sources
                .push(ContextSource::new(USER_SOURCE_ID, vec![definition])),
        }
    }

    /// 名前が一致する定義を全ソースから削除。削除した数を返す
    pub fn remove(&mut self, name: &str) -> usize {
        let mut removed = 0;
        for source in &mut self.sources {
            let before = source.definitions.len();
            source.definitions.retain(|definition| definition.name != name);
            removed += before - source.definitions.len();
        }
        removed
    }

    /// 全ソースを優先度順にまとめた定義
    ///
    /// 同名の定義はトリガーを合算し、最初に現れた位置に置く。
    pub fn definitions(&self) -> Vec<ContextDefinition> {
        let mut merged: Vec<ContextDefinition> = Vec::new();
        for definition in self.sources.iter().flat_map(|source| &source.definitions) {
            match merged.iter_mut().find(|existing| existing.name == definition.name) {
                Some(existing) => {
                    for trigger in &definition.triggers {
                        if !existing.triggers.contains(trigger) {
                            existing.triggers.push(trigger.clone());
                        }
                    }
                }
                None => merged.push(definition.clone()),
            }
        }
        merged
    }

    /// キーワードに一致するコンテキスト名（優先度順、重複なし）
    pub fn resolve(&self, keywords: &[String]) -> Vec<String> {
        if keywords.is_empty() {
            return Vec::new();
        }
        self.definitions()
            .into_iter()
            .filter(|definition| definition.overlap(keywords) >= self.min_overlap)
            .map(|definition| definition.name)
            .collect()
    }

    /// 現在の定義をJSONで書き出す（一時ファイル経由）
    pub fn persist(&self, path: &Path) -> KirinukiResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| KirinukiError::io("creating", parent, e))?;
        }
        let content = serde_json::to_vec_pretty(&self.definitions())?;
        blob::write_atomic(path, &content)?;
        info!("💾 Context definitions saved to: {}", path.display());
        Ok(())
    }
}
