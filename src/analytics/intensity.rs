//! 盛り上がりの強さ判定

use crate::config::{validate_intensity_levels, IntensityConfig, IntensityLevel};
use crate::error::KirinukiResult;
use crate::models::IntensityLabel;

use super::signal::EPSILON;

/// 昇順の閾値で順序付きラベルを割り当てる
#[derive(Debug, Clone)]
pub struct IntensityScale {
    levels: Vec<IntensityLevel>,
    normalize: bool,
}

impl IntensityScale {
    /// 閾値が昇順・重複なしでなければ`Config`エラー
    pub fn new(config: &IntensityConfig) -> KirinukiResult<Self> {
        validate_intensity_levels(&config.levels)?;
        Ok(Self {
            levels: config.levels.clone(),
            normalize: config.normalize,
        })
    }

    pub fn levels(&self) -> &[IntensityLevel] {
        &self.levels
    }

    pub fn level_names(&self) -> Vec<&str> {
        self.levels.iter().map(|level| level.name.as_str()).collect()
    }

    /// 値が厳密に上回る最も高いレベル。どれも上回らなければ最低レベル
    pub fn label(&self, value: f64) -> IntensityLabel {
        let rank = self
            .levels
            .iter()
            .rposition(|level| value > level.cutoff)
            .unwrap_or(0);
        IntensityLabel {
            name: self.levels[rank].name.clone(),
            rank,
        }
    }

    /// 1回の解析で得たfdelta群にラベルを付ける
    ///
    /// 正規化が有効なら平均fdeltaで割った値で判定する。
    pub fn classify(&self, fdeltas: &[f64]) -> Vec<IntensityLabel> {
        let scale = if self.normalize && !fdeltas.is_empty() {
            let mean = fdeltas.iter().sum::<f64>() / fdeltas.len() as f64;
            if mean > EPSILON {
                mean
            } else {
                1.0
            }
        } else {
            1.0
        };
        fdeltas
            .iter()
            .map(|fdelta| self.label(fdelta / scale))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(normalize: bool) -> IntensityScale {
        IntensityScale::new(&IntensityConfig {
            normalize,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_label_picks_highest_exceeded_cutoff() {
        let scale = scale(false);
        assert_eq!(scale.label(-1.0).name, "low");
        assert_eq!(scale.label(0.0).name, "low");
        assert_eq!(scale.label(0.7).name, "low");
        assert_eq!(scale.label(0.71).name, "medium");
        assert_eq!(scale.label(2.5).name, "very high");
        let top = scale.label(10.0);
        assert_eq!(top.name, "ultra high");
        assert_eq!(top.rank, 4);
    }

    #[test]
    fn test_classify_normalizes_by_mean() {
        let labels = scale(true).classify(&[10.0, 30.0, 80.0]);
        let names: Vec<&str> = labels.iter().map(|label| label.name.as_str()).collect();
        // 平均40で割ると0.25 / 0.75 / 2.0
        assert_eq!(names, vec!["low", "medium", "high"]);

        let raw = scale(false).classify(&[0.5, 1.5]);
        assert_eq!(raw[0].name, "low");
        assert_eq!(raw[1].name, "high");
    }

    #[test]
    fn test_invalid_levels_are_rejected() {
        let config = IntensityConfig {
            normalize: true,
            levels: vec![IntensityLevel::new("high", 1.0), IntensityLevel::new("low", 0.0)],
        };
        assert!(IntensityScale::new(&config).is_err());
        assert_eq!(scale(true).level_names().len(), 5);
    }
}
