//! 頻度解析エンジン
//!
//! メッセージのタイムラインを一定幅のバケットに数え上げ、平滑化・鋭敏化してから
//! 閾値を超えた区間をスパイクとして取り出す。

use crate::config::{SignalConfig, ThresholdPolicy};
use crate::error::{KirinukiError, KirinukiResult};
use crate::models::{FrequencyPoint, Message};
use tracing::debug;

/// 閾値比較などで使う許容誤差
pub const EPSILON: f64 = 1e-9;

const MIN_AUTO_WINDOW: usize = 5;
const MAX_AUTO_WINDOW: usize = 30;
/// 自動窓幅は配信の長さ（秒）をこの値で割って決める
const AUTO_WINDOW_DIVISOR: f64 = 240.0;
/// 頻度表のバケット数上限（1秒幅で約11.5日分）
pub const MAX_BUCKETS: usize = 1_000_000;

/// バケットごとのメッセージ数（0件のバケットも明示的に保持）
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    bucket_width: f64,
    counts: Vec<usize>,
}

impl FrequencyTable {
    /// `[0, duration]`を覆う頻度表を作る
    ///
    /// `duration_seconds`より後のメッセージがある場合は最後のメッセージまで広げる。
    /// 不正なタイムスタンプ（負数・NaN・無限大）や、バケット数が`MAX_BUCKETS`を
    /// 超える長さは`PipelineInput`エラー。
    pub fn build(
        messages: &[Message],
        duration_seconds: f64,
        bucket_width: f64,
    ) -> KirinukiResult<Self> {
        if !(bucket_width.is_finite() && bucket_width > 0.0) {
            return Err(KirinukiError::pipeline_input(format!(
                "bucket width must be positive, got {}",
                bucket_width
            )));
        }
        validate_timestamps(messages)?;

        let latest = messages
            .iter()
            .map(|message| message.timestamp)
            .fold(0.0_f64, f64::max);
        let span = duration_seconds.max(latest);
        let raw_buckets = (span / bucket_width).ceil();
        if raw_buckets.is_nan() || raw_buckets > MAX_BUCKETS as f64 {
            return Err(KirinukiError::pipeline_input(format!(
                "timeline of {} seconds needs more than {} buckets",
                span, MAX_BUCKETS
            )));
        }
        let buckets = (raw_buckets as usize).max(1);

        let mut counts = vec![0; buckets];
        for message in messages {
            let index = ((message.timestamp / bucket_width).floor() as usize).min(buckets - 1);
            counts[index] += 1;
        }

        Ok(Self {
            bucket_width,
            counts,
        })
    }

    pub fn bucket_width(&self) -> f64 {
        self.bucket_width
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// 全バケットの合計（メッセージ数と一致する）
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// 表がカバーする秒数
    pub fn span_seconds(&self) -> f64 {
        self.counts.len() as f64 * self.bucket_width
    }

    pub fn points(&self) -> Vec<FrequencyPoint> {
        self.counts
            .iter()
            .enumerate()
            .map(|(bucket_index, &count)| FrequencyPoint { bucket_index, count })
            .collect()
    }

    fn as_f64(&self) -> Vec<f64> {
        self.counts.iter().map(|&count| count as f64).collect()
    }
}

fn validate_timestamps(messages: &[Message]) -> KirinukiResult<()> {
    if let Some(bad) = messages
        .iter()
        .find(|message| !message.timestamp.is_finite() || message.timestamp < 0.0)
    {
        return Err(KirinukiError::pipeline_input(format!(
            "malformed timestamp {} in message from '{}'",
            bad.timestamp, bad.author_name
        )));
    }
    Ok(())
}

/// 検出されたスパイク区間
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeInterval {
    /// 開始バケット（含む）
    pub start_bucket: usize,
    /// 終了バケット（含まない）
    pub end_bucket: usize,
    /// 開始秒
    pub start: f64,
    /// 終了秒（配信の長さでクリップ済み）
    pub end: f64,
    /// 区間内ピークと開始時点の平滑化済み頻度の差
    pub fdelta: f64,
}

/// 1回分の解析結果
#[derive(Debug, Clone)]
pub struct SignalAnalysis {
    pub table: FrequencyTable,
    pub smoothed: Vec<f64>,
    pub diff: Vec<f64>,
    /// バケットごとの閾値（そのバケットまでの値だけから決まる）
    pub thresholds: Vec<f64>,
    /// 実際に使った移動平均の窓幅
    pub window: usize,
    /// 実際に使った鋭敏化カーネル幅
    pub sharpen_window: usize,
    /// 開始位置の昇順、互いに重ならない
    pub intervals: Vec<SpikeInterval>,
}

/// 頻度解析エンジン
#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// タイムラインからスパイク区間を検出する
    pub fn detect(&self, messages: &[Message], duration_seconds: u64) -> KirinukiResult<SignalAnalysis> {
        let config = &self.config;
        let table = FrequencyTable::build(messages, duration_seconds as f64, config.bucket_width)?;
        let buckets = table.len();

        // 窓幅より短い配信は全体を1つの窓として扱う
        let window = config
            .moving_average_window
            .unwrap_or_else(|| auto_window(table.span_seconds()))
            .min(buckets)
            .max(1);
        let sharpen_window = config.sharpen_window.unwrap_or((window / 2).max(1)).max(1);
        let extension_limit = config.extension_limit.unwrap_or(window * 2);

        let smoothed = moving_average(&table.as_f64(), window);
        let diff = sharpen(&smoothed, sharpen_window);
        let thresholds = trailing_thresholds(&diff, config.threshold);

        let candidates = find_candidates(&diff, &thresholds);
        let merged = merge_candidates(candidates, config.merge_gap);
        let extended: Vec<(usize, usize)> = merged
            .into_iter()
            .map(|interval| extend_interval(interval, &smoothed, extension_limit))
            .collect();

        let clip = if duration_seconds > 0 {
            duration_seconds as f64
        } else {
            table.span_seconds()
        };

        let intervals: Vec<SpikeInterval> = coalesce(extended)
            .into_iter()
            .filter_map(|(start_bucket, end_bucket)| {
                let start = start_bucket as f64 * table.bucket_width();
                let end = (end_bucket as f64 * table.bucket_width()).min(clip);
                if end - start + EPSILON < config.min_duration || end <= start {
                    return None;
                }
                let peak = smoothed[start_bucket..end_bucket]
                    .iter()
                    .copied()
                    .fold(f64::MIN, f64::max);
                Some(SpikeInterval {
                    start_bucket,
                    end_bucket,
                    start,
                    end,
                    fdelta: peak - smoothed[start_bucket],
                })
            })
            .collect();

        debug!(
            buckets = buckets,
            window = window,
            sharpen_window = sharpen_window,
            final_threshold = thresholds.last().copied().unwrap_or_default(),
            intervals = intervals.len(),
            "📈 Signal analysis finished"
        );

        Ok(SignalAnalysis {
            table,
            smoothed,
            diff,
            thresholds,
            window,
            sharpen_window,
            intervals,
        })
    }
}

/// 配信の長さから移動平均の窓幅を決める
pub fn auto_window(duration_seconds: f64) -> usize {
    let raw = (duration_seconds / AUTO_WINDOW_DIVISOR).round();
    (raw.max(0.0) as usize).clamp(MIN_AUTO_WINDOW, MAX_AUTO_WINDOW)
}

/// 中心化した一様窓の移動平均。端では窓を縮める（パディングしない）
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let left = (window - 1) / 2;
    let right = window / 2;

    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    for value in values {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + value);
    }

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(left);
            let hi = (i + right + 1).min(values.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// 直前`width`バケットの平均との差（急な立ち上がりほど大きい）
pub fn sharpen(smoothed: &[f64], width: usize) -> Vec<f64> {
    let width = width.max(1);
    (0..smoothed.len())
        .map(|i| {
            if i == 0 {
                return 0.0;
            }
            let lo = i.saturating_sub(width);
            let preceding = &smoothed[lo..i];
            smoothed[i] - preceding.iter().sum::<f64>() / preceding.len() as f64
        })
        .collect()
}

/// 閾値ポリシーから各バケットの閾値を計算
///
/// `StdDev`はバケット`i`までの`diff[0..=i]`の平均と標準偏差を使う。後から追記された
/// タイムラインで既存のスパイクが閾値を下回ることはない。自分自身を含めるので、
/// 先頭`k²+1`バケット未満では閾値を超えられない。
pub fn trailing_thresholds(diff: &[f64], policy: ThresholdPolicy) -> Vec<f64> {
    match policy {
        ThresholdPolicy::Absolute { value } => vec![value; diff.len()],
        ThresholdPolicy::StdDev { k } => {
            let mut sum = 0.0;
            let mut sum_sq = 0.0;
            diff.iter()
                .enumerate()
                .map(|(i, &value)| {
                    sum += value;
                    sum_sq += value * value;
                    let n = (i + 1) as f64;
                    let mean = sum / n;
                    let variance = (sum_sq / n - mean * mean).max(0.0);
                    mean + k * variance.sqrt()
                })
                .collect()
        }
    }
}

/// 閾値を超えた連続バケットを候補区間`[start, end)`にまとめる
pub fn find_candidates(diff: &[f64], thresholds: &[f64]) -> Vec<(usize, usize)> {
    let mut candidates = Vec::new();
    let mut open: Option<usize> = None;
    for (i, (&value, &threshold)) in diff.iter().zip(thresholds).enumerate() {
        let above = value > threshold + EPSILON;
        match (above, open) {
            (true, None) => open = Some(i),
            (false, Some(start)) => {
                candidates.push((start, i));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        candidates.push((start, diff.len().min(thresholds.len())));
    }
    candidates
}

/// `gap`未満の隙間で隔てられた候補を結合
pub fn merge_candidates(candidates: Vec<(usize, usize)>, gap: usize) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(candidates.len());
    for (start, end) in candidates {
        match merged.last_mut() {
            Some(last) if start - last.1 < gap => last.1 = end,
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// 平滑化系列が立ち上がり前の水準に戻る位置まで区間を広げる
///
/// 開始側は系列が下がり続ける限り遡る。終了側はまずピークまで登り、そこから
/// 開始時点の水準を上回っている間は平坦部と下り坂を進む。片側`limit`バケットまで。
pub fn extend_interval(interval: (usize, usize), smoothed: &[f64], limit: usize) -> (usize, usize) {
    let (mut start, mut end) = interval;
    let n = smoothed.len();

    let mut steps = 0;
    while start > 0 && steps < limit && smoothed[start - 1] + EPSILON < smoothed[start] {
        start -= 1;
        steps += 1;
    }
    let base = smoothed[start];

    let mut steps = 0;
    while end < n && steps < limit && smoothed[end] > smoothed[end - 1] + EPSILON {
        end += 1;
        steps += 1;
    }
    while end < n
        && steps < limit
        && smoothed[end] > base + EPSILON
        && smoothed[end] <= smoothed[end - 1] + EPSILON
    {
        end += 1;
        steps += 1;
    }

    (start, end)
}

/// 重なった区間をまとめて開始位置順に並べる
pub fn coalesce(mut intervals: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    intervals.sort_unstable();
    let mut result: Vec<(usize, usize)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match result.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => result.push((start, end)),
        }
    }
    result
}
