//! ハイライト区間への注釈付け
//!
//! 検出された区間ごとにメッセージ数・強さ・キーワード・コンテキストを求めて
//! `Highlight`を組み立てる。

use super::context_resolver::ContextResolver;
use super::intensity::IntensityScale;
use super::keywords::KeywordExtractor;
use super::signal::SpikeInterval;
use crate::config::{HighlightConfig, IntensityConfig, KeywordConfig};
use crate::error::KirinukiResult;
use crate::models::{Highlight, Message};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HighlightAnnotator {
    keywords: KeywordExtractor,
    intensity: IntensityScale,
    filters: HighlightConfig,
}

impl HighlightAnnotator {
    pub fn new(keywords: KeywordConfig, intensity: &IntensityConfig) -> KirinukiResult<Self> {
        Ok(Self {
            keywords: KeywordExtractor::new(keywords)?,
            intensity: IntensityScale::new(intensity)?,
            filters: HighlightConfig::default(),
        })
    }

    /// 注釈後の絞り込みを設定する
    pub fn with_filters(mut self, filters: HighlightConfig) -> Self {
        self.filters = filters;
        self
    }

    pub fn filters(&self) -> &HighlightConfig {
        &self.filters
    }

    pub fn keywords(&self) -> &KeywordExtractor {
        &self.keywords
    }

    pub fn intensity(&self) -> &IntensityScale {
        &self.intensity
    }

    /// 区間の並び（開始順）を保ったまま注釈付きハイライトにする
    ///
    /// 絞り込みが有効なら、相対的に短い区間は注釈前に、キーワードのないハイライトは注釈後に落とす。
    pub fn annotate(
        &self,
        intervals: &[SpikeInterval],
        messages: &[Message],
        resolver: &ContextResolver,
    ) -> Vec<Highlight> {
        let kept;
        let intervals = match self.filters.relative_duration_divisor {
            Some(divisor) => {
                kept = drop_relatively_short(intervals, divisor);
                kept.as_slice()
            }
            None => intervals,
        };

        let mut highlights = self.describe(intervals, messages, resolver);
        if self.filters.require_keywords {
            let before = highlights.len();
            highlights.retain(|highlight| !highlight.keywords.is_empty());
            debug!(dropped = before - highlights.len(), "Dropped highlights without keywords");
        }
        highlights
    }

    fn describe(
        &self,
        intervals: &[SpikeInterval],
        messages: &[Message],
        resolver: &ContextResolver,
    ) -> Vec<Highlight> {
        let fdeltas: Vec<f64> = intervals.iter().map(|interval| interval.fdelta).collect();
        let labels = self.intensity.classify(&fdeltas);

        intervals
            .iter()
            .zip(labels)
            .map(|(interval, intensity)| {
                let inside: Vec<&Message> = messages
                    .iter()
                    .filter(|message| {
                        message.timestamp >= interval.start && message.timestamp < interval.end
                    })
                    .collect();
                let keywords = self
                    .keywords
                    .extract(inside.iter().map(|message| message.text.as_str()));
                let contexts = resolver.resolve(&keywords);

                Highlight {
                    start: interval.start,
                    end: interval.end,
                    fdelta: interval.fdelta,
                    intensity,
                    message_count: inside.len(),
                    keywords,
                    contexts,
                }
            })
            .collect()
    }
}

/// 長さが平均の`1/divisor`以下の区間を落とす
pub fn drop_relatively_short(intervals: &[SpikeInterval], divisor: f64) -> Vec<SpikeInterval> {
    if intervals.is_empty() {
        return Vec::new();
    }
    let mean = intervals
        .iter()
        .map(|interval| interval.end - interval.start)
        .sum::<f64>()
        / intervals.len() as f64;
    let cutoff = mean / divisor;

    let kept: Vec<SpikeInterval> = intervals
        .iter()
        .filter(|interval| interval.end - interval.start > cutoff)
        .cloned()
        .collect();
    debug!(
        dropped = intervals.len() - kept.len(),
        cutoff = cutoff,
        "Dropped relatively short intervals"
    );
    kept
}
