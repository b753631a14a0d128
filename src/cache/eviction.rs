//! キャッシュ削除ポリシー
//!
//! どのエントリを削除するかの順序だけを差し替え可能にする。ストアの契約（1回の
//! `evict()`で最大1件）はポリシーに依存しない。

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// 削除候補の統計情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryStats {
    pub stream_id: String,
    pub created_at: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    /// ディスク上のバイト数
    pub size: u64,
    pub message_count: usize,
    pub is_complete: bool,
}

/// 削除対象を選ぶ戦略
pub trait EvictionPolicy: Send + Sync + Debug {
    /// ポリシー名
    fn name(&self) -> &'static str;

    /// 候補の中から削除するエントリのインデックスを返す
    fn select_victim(&self, candidates: &[EntryStats]) -> Option<usize>;
}

/// 最終アクセスが最も古いエントリを削除
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyUsed;

impl EvictionPolicy for LeastRecentlyUsed {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn select_victim(&self, candidates: &[EntryStats]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.last_access_time
                    .cmp(&b.last_access_time)
                    .then_with(|| a.stream_id.cmp(&b.stream_id))
            })
            .map(|(index, _)| index)
    }
}

/// 最も古く作成されたエントリを削除
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstInFirstOut;

impl EvictionPolicy for FirstInFirstOut {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select_victim(&self, candidates: &[EntryStats]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.stream_id.cmp(&b.stream_id))
            })
            .map(|(index, _)| index)
    }
}

/// 最終アクセスが最も新しいエントリを削除
#[derive(Debug, Default, Clone, Copy)]
pub struct MostRecentlyUsed;

impl EvictionPolicy for MostRecentlyUsed {
    fn name(&self) -> &'static str {
        "mru"
    }

    fn select_victim(&self, candidates: &[EntryStats]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.last_access_time
                    .cmp(&b.last_access_time)
                    .then_with(|| b.stream_id.cmp(&a.stream_id))
            })
            .map(|(index, _)| index)
    }
}

/// ランダムに1件削除
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomReplacement;

impl EvictionPolicy for RandomReplacement {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select_victim(&self, candidates: &[EntryStats]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..candidates.len()))
    }
}

/// 設定ファイルで指定する削除ポリシー
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    #[default]
    Lru,
    Fifo,
    Mru,
    Random,
}

impl EvictionStrategy {
    pub fn into_policy(self) -> Box<dyn EvictionPolicy> {
        match self {
            EvictionStrategy::Lru => Box::new(LeastRecentlyUsed),
            EvictionStrategy::Fifo => Box::new(FirstInFirstOut),
            EvictionStrategy::Mru => Box::new(MostRecentlyUsed),
            EvictionStrategy::Random => Box::new(RandomReplacement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stats(stream_id: &str, created_offset: i64, access_offset: i64) -> EntryStats {
        let base = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        EntryStats {
            stream_id: stream_id.to_string(),
            created_at: base + Duration::seconds(created_offset),
            last_access_time: base + Duration::seconds(access_offset),
            size: 100,
            message_count: 10,
            is_complete: true,
        }
    }

    #[test]
    fn test_lru_picks_oldest_access() {
        let candidates = vec![stats("a", 0, 50), stats("b", 10, 5), stats("c", 20, 30)];
        assert_eq!(LeastRecentlyUsed.select_victim(&candidates), Some(1));
    }

    #[test]
    fn test_fifo_picks_oldest_creation() {
        let candidates = vec![stats("a", 30, 1), stats("b", 10, 50), stats("c", 20, 30)];
        assert_eq!(FirstInFirstOut.select_victim(&candidates), Some(1));
    }

    #[test]
    fn test_mru_picks_newest_access() {
        let candidates = vec![stats("a", 0, 50), stats("b", 10, 5), stats("c", 20, 30)];
        assert_eq!(MostRecentlyUsed.select_victim(&candidates), Some(0));
    }

    #[test]
    fn test_ties_are_broken_by_stream_id() {
        let candidates = vec![stats("b", 0, 0), stats("a", 0, 0)];
        assert_eq!(LeastRecentlyUsed.select_victim(&candidates), Some(1));
        assert_eq!(FirstInFirstOut.select_victim(&candidates), Some(1));
    }

    #[test]
    fn test_random_stays_in_bounds() {
        let candidates = vec![stats("a", 0, 0), stats("b", 1, 1), stats("c", 2, 2)];
        for _ in 0..20 {
            let victim = RandomReplacement.select_victim(&candidates).unwrap();
            assert!(victim < candidates.len());
        }
    }

    #[test]
    fn test_empty_candidates() {
        for strategy in [
            EvictionStrategy::Lru,
            EvictionStrategy::Fifo,
            EvictionStrategy::Mru,
            EvictionStrategy::Random,
        ] {
            assert_eq!(strategy.into_policy().select_victim(&[]), None);
        }
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(EvictionStrategy::Lru.into_policy().name(), "lru");
        assert_eq!(EvictionStrategy::Random.into_policy().name(), "random");
        let parsed: EvictionStrategy = serde_json::from_str("\"mru\"").unwrap();
        assert_eq!(parsed, EvictionStrategy::Mru);
    }
}
