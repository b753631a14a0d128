//! 解析設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と、各コンポーネントに渡す設定値を提供します。

use crate::cache::eviction::EvictionStrategy;
use crate::error::{KirinukiError, KirinukiResult};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// キャッシュ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// キャッシュのルートディレクトリ（Noneの場合はXDGキャッシュディレクトリ使用）
    pub root: Option<PathBuf>,
    /// 保持する配信エントリ数の上限（Noneは無制限）
    pub cache_limit: Option<usize>,
    /// 上限超過時の削除ポリシー
    pub eviction: EvictionStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            cache_limit: Some(20),
            eviction: EvictionStrategy::Lru,
        }
    }
}

impl CacheConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    /// 実際に使用するルートディレクトリを解決
    pub fn resolved_root(&self) -> KirinukiResult<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => default_cache_root(),
        }
    }
}

/// 閾値の決め方
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// diff系列の平均 + k × 標準偏差
    StdDev { k: f64 },
    /// 固定値
    Absolute { value: f64 },
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::StdDev { k: 2.5 }
    }
}

/// 頻度解析（信号処理）設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalConfig {
    /// バケット幅（秒）
    pub bucket_width: f64,
    /// 移動平均の窓幅（バケット数）。Noneなら配信の長さから決定
    pub moving_average_window: Option<usize>,
    /// 鋭敏化カーネルの幅（バケット数）。Noneなら移動平均幅の半分
    pub sharpen_window: Option<usize>,
    pub threshold: ThresholdPolicy,
    /// この幅未満の隙間で隔てられた候補区間は結合する（バケット数）
    pub merge_gap: usize,
    /// 境界拡張の片側上限（バケット数）。Noneなら移動平均幅の2倍
    pub extension_limit: Option<usize>,
    /// 最短ハイライト長（秒）
    pub min_duration: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            bucket_width: 1.0,
            moving_average_window: None,
            sharpen_window: None,
            threshold: ThresholdPolicy::default(),
            merge_gap: 3,
            extension_limit: None,
            min_duration: 5.0,
        }
    }
}

/// キーワード抽出設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeywordConfig {
    /// ハイライトごとのキーワード数上限
    pub limit: usize,
    /// キーワードとして採用する最小出現メッセージ数
    pub min_count: usize,
    /// 除外語リスト（正規化後の形で比較）
    pub stop_words: Vec<String>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            min_count: 2,
            stop_words: default_stop_words(),
        }
    }
}

fn default_stop_words() -> Vec<String> {
    [
        "a", "an", "the", "is", "are", "was", "i", "you", "he", "she", "it", "we", "they", "to",
        "of", "and", "or", "in", "on", "at", "for", "this", "that", "so", "my", "me", "be", "im",
        "its", "の", "は", "が", "を", "に", "で", "と", "も",
    ]
    .iter()
    .map(|word| word.to_string())
    .collect()
}

/// 強さレベル（名前と閾値）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntensityLevel {
    pub name: String,
    pub cutoff: f64,
}

impl IntensityLevel {
    pub fn new(name: impl Into<String>, cutoff: f64) -> Self {
        Self {
            name: name.into(),
            cutoff,
        }
    }
}

/// 強さ判定設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntensityConfig {
    /// fdeltaを実行内の平均fdeltaで割ってから比較する
    pub normalize: bool,
    /// 昇順の閾値リスト
    pub levels: Vec<IntensityLevel>,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            levels: vec![
                IntensityLevel::new("low", 0.0),
                IntensityLevel::new("medium", 0.7),
                IntensityLevel::new("high", 1.2),
                IntensityLevel::new("very high", 2.0),
                IntensityLevel::new("ultra high", 3.0),
            ],
        }
    }
}

/// コンテキスト推定設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// 読み込むコンテキスト定義ファイル（順序が優先度）
    pub sources: Vec<PathBuf>,
    /// 同梱のデフォルト定義を最後に追加する
    pub include_builtin: bool,
    /// コンテキスト一致に必要なキーワード重複数
    pub min_overlap: usize,
    /// 読み込めないソースを警告のみでスキップする
    pub tolerate_errors: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            include_builtin: false,
            min_overlap: 1,
            tolerate_errors: false,
        }
    }
}

/// 注釈後のハイライト絞り込み（どちらも既定では無効）
///
/// 有効にすると、ハイライトの有無が他のハイライトやキーワードに左右されるため、
/// 追記後の再解析で既存のハイライトが消えることがある。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HighlightConfig {
    /// キーワードが1つも残らなかったハイライトを捨てる
    pub require_keywords: bool,
    /// 平均長をこの値で割った長さ以下のハイライトを捨てる
    pub relative_duration_divisor: Option<f64>,
}

/// 解析全体の設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyserConfig {
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// 取得するメッセージ数の上限（Noneは全件）
    pub message_limit: Option<usize>,
    pub cache: CacheConfig,
    pub signal: SignalConfig,
    pub keywords: KeywordConfig,
    pub intensity: IntensityConfig,
    pub contexts: ContextConfig,
    pub highlights: HighlightConfig,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            message_limit: None,
            cache: CacheConfig::default(),
            signal: SignalConfig::default(),
            keywords: KeywordConfig::default(),
            intensity: IntensityConfig::default(),
            contexts: ContextConfig::default(),
            highlights: HighlightConfig::default(),
        }
    }
}

impl AnalyserConfig {
    /// TOML文字列から読み込んで検証
    pub fn from_toml_str(content: &str) -> KirinukiResult<Self> {
        let config: AnalyserConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 設定値の妥当性を検証
    pub fn validate(&self) -> KirinukiResult<()> {
        if self.cache.cache_limit == Some(0) {
            return Err(KirinukiError::config(
                "cache.cache_limit",
                "must be at least 1 (omit it to keep every entry)",
            ));
        }

        let signal = &self.signal;
        if !(signal.bucket_width.is_finite() && signal.bucket_width > 0.0) {
            return Err(KirinukiError::config(
                "signal.bucket_width",
                format!("must be a positive number of seconds, got {}", signal.bucket_width),
            ));
        }
        if signal.moving_average_window == Some(0) {
            return Err(KirinukiError::config(
                "signal.moving_average_window",
                "must be at least 1",
            ));
        }
        if signal.sharpen_window == Some(0) {
            return Err(KirinukiError::config("signal.sharpen_window", "must be at least 1"));
        }
        match signal.threshold {
            ThresholdPolicy::StdDev { k } if !k.is_finite() => {
                return Err(KirinukiError::config("signal.threshold", "k must be finite"));
            }
            ThresholdPolicy::Absolute { value } if !value.is_finite() => {
                return Err(KirinukiError::config("signal.threshold", "value must be finite"));
            }
            _ => {}
        }
        if !(signal.min_duration.is_finite() && signal.min_duration >= 0.0) {
            return Err(KirinukiError::config(
                "signal.min_duration",
                "must be zero or a positive number of seconds",
            ));
        }

        validate_intensity_levels(&self.intensity.levels)?;

        if self.contexts.min_overlap == 0 {
            return Err(KirinukiError::config("contexts.min_overlap", "must be at least 1"));
        }

        if let Some(divisor) = self.highlights.relative_duration_divisor {
            if !(divisor.is_finite() && divisor > 0.0) {
                return Err(KirinukiError::config(
                    "highlights.relative_duration_divisor",
                    format!("must be a positive number, got {}", divisor),
                ));
            }
        }

        Ok(())
    }
}

/// 強さレベルの閾値が昇順かつ重複なしであることを検証
pub fn validate_intensity_levels(levels: &[IntensityLevel]) -> KirinukiResult<()> {
    if levels.is_empty() {
        return Err(KirinukiError::config(
            "intensity.levels",
            "at least one level is required",
        ));
    }
    for pair in levels.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        if lower.cutoff == upper.cutoff {
            return Err(KirinukiError::config(
                "intensity.levels",
                format!(
                    "cutoffs must be unique ('{}' and '{}' share {})",
                    lower.name, upper.name, lower.cutoff
                ),
            ));
        }
        if lower.cutoff > upper.cutoff {
            return Err(KirinukiError::config(
                "intensity.levels",
                format!(
                    "cutoffs must be in ascending order ('{}' {} > '{}' {})",
                    lower.name, lower.cutoff, upper.name, upper.cutoff
                ),
            ));
        }
    }
    Ok(())
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "sifyfy", "kirinuki")
}

/// XDGキャッシュディレクトリ配下のデフォルトキャッシュルート
pub fn default_cache_root() -> KirinukiResult<PathBuf> {
    let dirs = project_dirs()
        .ok_or_else(|| KirinukiError::config("cache.root", "failed to get project directories"))?;
    Ok(dirs.cache_dir().join("streams"))
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// 新しい設定マネージャーを作成
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// 任意のパスを使う設定マネージャーを作成
    pub fn with_path(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();

        // 設定ディレクトリを作成（存在しない場合）
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        Ok(Self { config_path })
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn get_config_path() -> Result<PathBuf> {
        let project_dirs = project_dirs().context("Failed to get project directories")?;
        let config_file = project_dirs.config_dir().join("config.toml");

        debug!("Config file path: {}", config_file.display());

        Ok(config_file)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 設定を読み込み
    pub fn load_config(&self) -> Result<AnalyserConfig> {
        if !self.config_path.exists() {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            return Ok(AnalyserConfig::default());
        }

        let config_content = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;

        let config = AnalyserConfig::from_toml_str(&config_content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })?;

        info!("✅ Configuration loaded from: {}", self.config_path.display());

        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AnalyserConfig) -> Result<()> {
        let config_content =
            toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, config_content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;

        info!("💾 Configuration saved to: {}", self.config_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalyserConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.cache_limit, Some(20));
        assert_eq!(config.cache.eviction, EvictionStrategy::Lru);
        assert_eq!(config.signal.bucket_width, 1.0);
        assert_eq!(config.signal.threshold, ThresholdPolicy::StdDev { k: 2.5 });
        assert_eq!(config.intensity.levels.len(), 5);
        assert!(config.contexts.sources.is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AnalyserConfig::from_toml_str(
            r#"
message_limit = 1000

[cache]
cache_limit = 3
eviction = "fifo"

[signal]
moving_average_window = 10
threshold = { policy = "absolute", value = 4.0 }
"#,
        )
        .unwrap();

        assert_eq!(config.message_limit, Some(1000));
        assert_eq!(config.cache.cache_limit, Some(3));
        assert_eq!(config.cache.eviction, EvictionStrategy::Fifo);
        assert_eq!(config.signal.moving_average_window, Some(10));
        assert_eq!(
            config.signal.threshold,
            ThresholdPolicy::Absolute { value: 4.0 }
        );
        assert_eq!(config.signal.merge_gap, 3);
        assert_eq!(config.keywords.limit, 5);
        assert_eq!(config.highlights, HighlightConfig::default());
    }

    #[test]
    fn test_highlight_filters_are_opt_in() {
        let config = AnalyserConfig::from_toml_str(
            r#"
[highlights]
require_keywords = true
relative_duration_divisor = 3.0
"#,
        )
        .unwrap();
        assert!(config.highlights.require_keywords);
        assert_eq!(config.highlights.relative_duration_divisor, Some(3.0));

        let mut config = AnalyserConfig::default();
        config.highlights.relative_duration_divisor = Some(0.0);
        assert!(matches!(config.validate(), Err(KirinukiError::Config { .. })));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = AnalyserConfig::default();
        config.signal.bucket_width = 0.0;
        assert!(matches!(config.validate(), Err(KirinukiError::Config { .. })));

        let mut config = AnalyserConfig::default();
        config.cache.cache_limit = Some(0);
        assert!(config.validate().is_err());

        let mut config = AnalyserConfig::default();
        config.signal.moving_average_window = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_intensity_levels_validation() {
        let ascending = vec![
            IntensityLevel::new("low", 0.0),
            IntensityLevel::new("medium", 0.7),
            IntensityLevel::new("high", 1.2),
        ];
        assert!(validate_intensity_levels(&ascending).is_ok());

        let not_ascending = vec![
            IntensityLevel::new("low", 0.0),
            IntensityLevel::new("medium", 1.0),
            IntensityLevel::new("high", 0.5),
        ];
        let error = validate_intensity_levels(&not_ascending).unwrap_err();
        assert!(error.to_string().contains("ascending"));

        let duplicated = vec![
            IntensityLevel::new("low", 0.0),
            IntensityLevel::new("medium", 1.0),
            IntensityLevel::new("high", 1.0),
        ];
        let error = validate_intensity_levels(&duplicated).unwrap_err();
        assert!(error.to_string().contains("unique"));

        assert!(validate_intensity_levels(&[]).is_err());
    }

    #[test]
    fn test_config_manager_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("nested/config.toml")).unwrap();

        // ファイルがなければデフォルト
        let config = manager.load_config().unwrap();
        assert_eq!(config, AnalyserConfig::default());

        let mut config = AnalyserConfig::default();
        config.cache.root = Some(temp_dir.path().join("cache"));
        config.keywords.limit = 8;
        config.contexts.include_builtin = true;
        manager.save_config(&config).unwrap();

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_manager_rejects_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[signal]\nbucket_width = -1.0\n").unwrap();

        let manager = ConfigManager::with_path(&path).unwrap();
        assert!(manager.load_config().is_err());
    }
}
