use serde::{Deserialize, Serialize};
use std::fmt;

/// チャットメッセージ（配信開始からのオフセット秒で管理）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Message {
    /// 配信開始からの経過秒数（0以上）
    pub timestamp: f64,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    #[serde(default)]
    pub kind: MessageKind,
}

/// メッセージ種別
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Superchat {
        amount: String,
    },
    Sticker {
        amount: String,
    },
    Membership,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Superchat { .. } => "superchat",
            MessageKind::Sticker { .. } => "sticker",
            MessageKind::Membership => "membership",
        }
    }
}

impl Message {
    pub fn new(
        timestamp: f64,
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            author_id: author_id.into(),
            author_name: author_name.into(),
            text: text.into(),
            kind: MessageKind::Text,
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Super Chat / スーパーステッカーかどうか
    pub fn is_paid(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::Superchat { .. } | MessageKind::Sticker { .. }
        )
    }

    /// H:MM:SS形式のタイムスタンプ
    pub fn time_hms(&self) -> String {
        format_hms(self.timestamp)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MessageKind::Superchat { amount } => write!(
                f,
                "[{}] {}: {} ({})",
                self.time_hms(),
                self.author_name,
                self.text,
                amount
            ),
            MessageKind::Sticker { amount } => write!(
                f,
                "[{}] {} sent a sticker ({})",
                self.time_hms(),
                self.author_name,
                amount
            ),
            MessageKind::Membership => write!(
                f,
                "[{}] {} has joined membership. {}",
                self.time_hms(),
                self.author_name,
                self.text
            ),
            MessageKind::Text => {
                write!(f, "[{}] {}: {}", self.time_hms(), self.author_name, self.text)
            }
        }
    }
}

/// 配信メタデータ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamMetadata {
    /// 配信ID（キャッシュのキー）
    pub stream_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel: String,
    /// 配信の長さ（秒）。不明な場合は0
    #[serde(default)]
    pub duration_seconds: u64,
    /// キャッシュ済みメッセージが全チャットか（falseなら上限付きの先頭部分）
    #[serde(default)]
    pub is_complete: bool,
    /// 取得時に適用した件数上限（Noneは無制限）
    #[serde(default)]
    pub message_limit: Option<usize>,
}

impl StreamMetadata {
    pub fn new(stream_id: impl Into<String>, duration_seconds: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            duration_seconds,
            is_complete: true,
            ..Default::default()
        }
    }
}

/// 一定幅のバケットに入ったメッセージ数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrequencyPoint {
    pub bucket_index: usize,
    pub count: usize,
}

/// 盛り上がりの強さ（順序付きラベル）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct IntensityLabel {
    pub name: String,
    /// 0が最も弱い
    pub rank: usize,
}

impl fmt::Display for IntensityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 検出されたハイライト区間
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Highlight {
    /// 開始秒（含む）
    pub start: f64,
    /// 終了秒（含まない）。配信の長さを超えない
    pub end: f64,
    /// 区間内のピークと開始時点の平滑化済み頻度の差（正なら本物の盛り上がり）
    pub fdelta: f64,
    pub intensity: IntensityLabel,
    pub message_count: usize,
    /// 頻度の高い順のキーワード
    pub keywords: Vec<String>,
    /// 推定されたコンテキスト名（空なら推定なし）
    pub contexts: Vec<String>,
}

impl Highlight {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// タイムスタンプ付きの視聴URL
    pub fn url(&self, stream_id: &str) -> String {
        format!("https://youtu.be/{}?t={}", stream_id, self.start.floor() as u64)
    }

    pub fn contains(&self, timestamp: f64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn context_label(&self) -> String {
        if self.contexts.is_empty() {
            "None".to_string()
        } else {
            self.contexts.join("/")
        }
    }
}

impl fmt::Display for Highlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({} messages, {} intensity, {:.3} diff, {}s duration)",
            format_hms(self.start),
            self.context_label(),
            self.keywords.join(", "),
            self.message_count,
            self.intensity,
            self.fdelta,
            self.duration().round() as u64
        )
    }
}

/// 秒数をH:MM:SS形式に変換
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0.0), "0:00:00");
        assert_eq!(format_hms(132.7), "0:02:12");
        assert_eq!(format_hms(3723.0), "1:02:03");
        assert_eq!(format_hms(-5.0), "0:00:00");
    }

    #[test]
    fn test_message_kind_serialization() {
        let message = Message::new(12.5, "UC1", "viewer", "nice").with_kind(
            MessageKind::Superchat {
                amount: "¥500".to_string(),
            },
        );
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("superchat"));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_paid());
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_message_kind_defaults_to_text() {
        let parsed: Message = serde_json::from_str(
            r#"{"timestamp": 1.0, "author_id": "a", "author_name": "b", "text": "lol"}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind, MessageKind::Text);
        assert!(!parsed.is_paid());
    }

    #[test]
    fn test_highlight_display_and_url() {
        let highlight = Highlight {
            start: 38.0,
            end: 50.0,
            fdelta: 1.0449,
            intensity: IntensityLabel {
                name: "very high".to_string(),
                rank: 3,
            },
            message_count: 114,
            keywords: vec!["草".to_string(), "lol".to_string()],
            contexts: vec!["funny".to_string()],
        };
        assert_eq!(
            highlight.to_string(),
            "[0:00:38] funny: 草, lol (114 messages, very high intensity, 1.045 diff, 12s duration)"
        );
        assert_eq!(highlight.url("wAPCSnAhhC8"), "https://youtu.be/wAPCSnAhhC8?t=38");
        assert!(highlight.contains(38.0));
        assert!(!highlight.contains(50.0));
    }
}
