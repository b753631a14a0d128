//! キーワード抽出
//!
//! チャット特有の表記揺れ（大文字小文字、連打、絵文字ショートコード）を正規化してから数える。

use crate::config::KeywordConfig;
use crate::error::{KirinukiError, KirinukiResult};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// `:_kusa:`のような絵文字ショートコード
const EMOTE_PATTERN: &str = r":[^:\s]+:";

/// 出現数と初出順
#[derive(Debug, Clone, Copy)]
struct Tally {
    count: usize,
    first_seen: usize,
}

/// キーワード抽出器
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    config: KeywordConfig,
    stop_words: HashSet<String>,
    emote: Regex,
}

impl KeywordExtractor {
    pub fn new(config: KeywordConfig) -> KirinukiResult<Self> {
        let emote = Regex::new(EMOTE_PATTERN)
            .map_err(|e| KirinukiError::config("keywords.emote_pattern", e.to_string()))?;
        let stop_words = config
            .stop_words
            .iter()
            .map(|word| normalize_token(word))
            .filter(|word| !word.is_empty())
            .collect();
        Ok(Self {
            config,
            stop_words,
            emote,
        })
    }

    pub fn config(&self) -> &KeywordConfig {
        &self.config
    }

    /// 1メッセージを正規化済みトークンに分割
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for chunk in text.split_whitespace() {
            let mut rest = 0;
            for emote in self.emote.find_iter(chunk) {
                push_token(&mut tokens, &chunk[rest..emote.start()]);
                tokens.push(emote.as_str().to_lowercase());
                rest = emote.end();
            }
            push_token(&mut tokens, &chunk[rest..]);
        }
        tokens
    }

    /// 頻度の高い順に上位キーワードを返す（同数は初出順）
    ///
    /// 1メッセージ内の重複は1回と数え、除外語と`min_count`未満の語は落とす。
    pub fn extract<'a, I>(&self, texts: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tallies = self.tally(texts, |token| self.stop_words.contains(token));
        rank(tallies)
            .into_iter()
            .filter(|(_, count)| *count >= self.config.min_count)
            .take(self.config.limit)
            .map(|(token, _)| token)
            .collect()
    }

    /// 指定語を除いた最頻出の正規化済みフレーズとその出現メッセージ数
    pub fn most_used<'a, I>(&self, texts: I, exclude: &[&str]) -> Option<(String, usize)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let excluded: HashSet<String> = exclude.iter().map(|word| normalize_token(word)).collect();
        let tallies = self.tally(texts, |token| excluded.contains(token));
        rank(tallies).into_iter().next()
    }

    fn tally<'a, I, F>(&self, texts: I, skip: F) -> HashMap<String, Tally>
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&str) -> bool,
    {
        let mut tallies: HashMap<String, Tally> = HashMap::new();
        let mut order = 0;
        for text in texts {
            let mut seen = HashSet::new();
            for token in self.tokenize(text) {
                if skip(token.as_str()) || !seen.insert(token.clone()) {
                    continue;
                }
                let next = order;
                let tally = tallies.entry(token).or_insert_with(|| {
                    order += 1;
                    Tally {
                        count: 0,
                        first_seen: next,
                    }
                });
                tally.count += 1;
            }
        }
        tallies
    }
}

fn push_token(tokens: &mut Vec<String>, raw: &str) {
    let token = normalize_token(raw);
    if !token.is_empty() {
        tokens.push(token);
    }
}

fn rank(tallies: HashMap<String, Tally>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, Tally)> = tallies.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.first_seen.cmp(&b.first_seen))
    });
    ranked
        .into_iter()
        .map(|(token, tally)| (token, tally.count))
        .collect()
}

/// 小文字化し、前後のASCII記号を落として連打を畳む
///
/// 記号だけのトークン（`!!!`、`?`）は記号を残す。
pub fn normalize_token(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let stripped = lower.trim_matches(|c: char| c.is_ascii_punctuation());
    let base = if stripped.is_empty() {
        lower.as_str()
    } else {
        stripped
    };
    collapse_repetition(base)
}

/// トリガー語をキーワードと同じ形に正規化する
///
/// 完全一致のフレーズは`normalize_token`を通す（絵文字ショートコードは小文字化のみ）。
/// 部分一致のフレーズは単位の繰り返しを畳まず、文字の連続だけを畳む。
pub fn normalize_trigger_phrase(phrase: &str, is_exact: bool) -> String {
    let lower = phrase.trim().to_lowercase();
    if is_emote(&lower) {
        lower
    } else if is_exact {
        normalize_token(&lower)
    } else {
        collapse_runs(&lower)
    }
}

fn is_emote(token: &str) -> bool {
    token.len() > 2
        && token.starts_with(':')
        && token.ends_with(':')
        && !token[1..token.len() - 1].contains(|c: char| c == ':' || c.is_whitespace())
}

/// 連打を畳む
///
/// 同じ単位の繰り返しだけでできたトークンは単位に（`wwww`→`w`、`hahaha`→`ha`）、
/// 3文字以上の同一文字の連続は1文字に（`loooool`→`lol`）する。
/// ASCII以外の文字は2文字の連続でも1文字にする（`かわいい`→`かわい`）。
pub fn collapse_repetition(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();

    for unit in 1..=len / 2 {
        if len % unit == 0 && chars.chunks(unit).all(|chunk| chunk == &chars[..unit]) {
            return chars[..unit].iter().collect();
        }
    }

    collapse_runs(token)
}

fn collapse_runs(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();
    let mut collapsed = String::with_capacity(token.len());
    let mut i = 0;
    while i < len {
        let mut run = 1;
        while i + run < len && chars[i + run] == chars[i] {
            run += 1;
        }
        let keep = if run >= 3 || (run == 2 && !chars[i].is_ascii()) {
            1
        } else {
            run
        };
        collapsed.extend(std::iter::repeat(chars[i]).take(keep));
        i += run;
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> KeywordExtractor {
        KeywordExtractor::new(KeywordConfig::default()).unwrap()
    }

    #[test]
    fn test_collapse_repetition() {
        assert_eq!(collapse_repetition("wwww"), "w");
        assert_eq!(collapse_repetition("hahaha"), "ha");
        assert_eq!(collapse_repetition("草草草"), "草");
        assert_eq!(collapse_repetition("loooool"), "lol");
        assert_eq!(collapse_repetition("lol"), "lol");
        assert_eq!(collapse_repetition("good"), "good");
        assert_eq!(collapse_repetition(""), "");
    }

    #[test]
    fn test_elongated_japanese_shares_one_keyword() {
        assert_eq!(collapse_repetition("かわいい"), "かわい");
        assert_eq!(collapse_repetition("かわいいい"), collapse_repetition("かわいい"));
        assert_eq!(collapse_repetition("すごーーい"), "すごーい");
        assert_eq!(collapse_repetition("good"), "good");

        let keywords = extractor().extract(["かわいいい", "かわいい", "かわいいいいい"].iter().copied());
        assert_eq!(keywords, vec!["かわい"]);
    }

    #[test]
    fn test_normalize_trigger_phrase() {
        assert_eq!(normalize_trigger_phrase("かっこいい", true), "かっこい");
        assert_eq!(normalize_trigger_phrase("てぇてぇ", true), "てぇ");
        assert_eq!(normalize_trigger_phrase("LOL!", true), "lol");
        assert_eq!(normalize_trigger_phrase(":_Kusa:", true), ":_kusa:");
        // 部分一致は単位の繰り返しを残す
        assert_eq!(normalize_trigger_phrase("haha", false), "haha");
        assert_eq!(normalize_trigger_phrase("かわいい", false), "かわい");
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("LOL!!"), "lol");
        assert_eq!(normalize_token("\"Nice\""), "nice");
        assert_eq!(normalize_token("that's"), "that's");
        assert_eq!(normalize_token("!!!"), "!");
        assert_eq!(normalize_token("???"), "?");
        assert_eq!(normalize_token("かわいいいい"), "かわい");
    }

    #[test]
    fn test_tokenize_keeps_emotes() {
        let tokens = extractor().tokenize("KUSA:_kusa::_kusa: wwwww");
        assert_eq!(tokens, vec!["kusa", ":_kusa:", ":_kusa:", "w"]);
    }

    #[test]
    fn test_extract_ranks_by_message_frequency() {
        let texts = [
            "lol lol lol",
            "LOL that was great",
            "草",
            "great play lol",
            "草草草",
            "the end",
        ];
        let keywords = extractor().extract(texts.iter().copied());
        // "lol"は3メッセージ、"草"と"great"は2メッセージ（初出順）
        assert_eq!(keywords, vec!["lol", "great", "草"]);
    }

    #[test]
    fn test_extract_respects_limit_and_min_count() {
        let config = KeywordConfig {
            limit: 1,
            min_count: 1,
            stop_words: vec![],
        };
        let extractor = KeywordExtractor::new(config).unwrap();
        assert_eq!(extractor.extract(["a b", "b"].iter().copied()), vec!["b"]);
        assert!(extractor.extract(std::iter::empty::<&str>()).is_empty());
    }

    #[test]
    fn test_most_used_excludes_terms() {
        let texts = ["lol", "LOL", "草", "草", "草 lol", "nice"];
        let extractor = extractor();
        assert_eq!(
            extractor.most_used(texts.iter().copied(), &[]),
            Some(("lol".to_string(), 3))
        );
        assert_eq!(
            extractor.most_used(texts.iter().copied(), &["LOL"]),
            Some(("草".to_string(), 3))
        );
        assert_eq!(extractor.most_used(std::iter::empty::<&str>(), &[]), None);
    }
}
