use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const TRUNCATION_MARKER: &str = "...";

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSource {
    pub number: u32,
    pub title: String,
    pub source: String,
    pub url: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub relevance: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerDetails {
    pub content: String,
    #[serde(default)]
    pub citations: BTreeSet<u32>,
}

/// Timing and provenance facts reported by the backend in the `metadata` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMetadata {
    #[serde(default)]
    pub query_timestamp: Option<String>,
    #[serde(default)]
    pub news_timestamp: Option<String>,
    #[serde(default)]
    pub articles_analyzed: u32,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_percent"
    )]
    pub confidence: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAnswer {
    pub tldr: String,
    pub details: AnswerDetails,
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub confidence: u8,
    #[serde(default)]
    pub sources: Vec<ArticleSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnswerMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<StructuredAnswer>,
}

/// A message before the store has assigned its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub answer: Option<StructuredAnswer>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            answer: None,
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            answer: None,
        }
    }
}

/// Fields merged into an existing message; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub answer: Option<StructuredAnswer>,
}

impl MessagePatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.answer.is_none()
    }

    pub(crate) fn apply_to(self, message: &mut ChatMessage) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(answer) = self.answer {
            message.answer = Some(answer);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub thread_id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    pub id: String,
    pub thread_id: String,
    pub title: String,
    pub preview: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Chat> for ChatListItem {
    fn from(chat: &Chat) -> Self {
        let preview = chat
            .messages
            .iter()
            .rev()
            .map(|message| message.content.trim())
            .find(|content| !content.is_empty())
            .map(|content| truncate_chars(content, PREVIEW_CHARS));

        Self {
            id: chat.id.clone(),
            thread_id: chat.thread_id.clone(),
            title: chat.title.clone(),
            preview,
            updated_at: chat.updated_at,
        }
    }
}

/// Keeps the first `max` characters and appends [`TRUNCATION_MARKER`] when
/// anything was cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Relevance and confidence scores arrive as any JSON number; they are rounded
/// and clamped to `0..=100`.
pub fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

pub(crate) fn deserialize_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    Ok(clamp_percent(value))
}

pub(crate) fn deserialize_optional_percent<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(clamp_percent))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::model::{
        AnswerMetadata, ArticleSource, Chat, ChatListItem, ChatMessage, MessageRole,
        StructuredAnswer, truncate_chars,
    };

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello!", 5), "hello...");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("ééé", 2), "éé...");
    }

    #[test]
    fn list_item_previews_last_non_empty_message() {
        let now = Utc::now();
        let message = |id: &str, role, content: &str| ChatMessage {
            id: id.to_string(),
            role,
            content: content.to_string(),
            timestamp: now,
            answer: None,
        };
        let chat = Chat {
            id: "c1".to_string(),
            thread_id: "t1".to_string(),
            title: "BTC".to_string(),
            messages: vec![
                message("m1", MessageRole::User, "what about btc?"),
                message("m2", MessageRole::Assistant, ""),
            ],
            created_at: now,
            updated_at: now,
        };

        let item = ChatListItem::from(&chat);
        assert_eq!(item.thread_id, "t1");
        assert_eq!(item.preview.as_deref(), Some("what about btc?"));
    }

    #[test]
    fn fractional_and_out_of_range_scores_are_clamped() {
        let source: ArticleSource = serde_json::from_str(
            r#"{"number":1,"title":"t","source":"s","url":"u","relevance":72.5}"#,
        )
        .expect("source");
        assert_eq!(source.relevance, 73);

        let answer: StructuredAnswer = serde_json::from_str(
            r#"{"tldr":"x","details":{"content":"y"},"confidence":140.2}"#,
        )
        .expect("answer");
        assert_eq!(answer.confidence, 100);

        let metadata: AnswerMetadata =
            serde_json::from_str(r#"{"confidence":-3.4}"#).expect("metadata");
        assert_eq!(metadata.confidence, Some(0));
        let metadata: AnswerMetadata = serde_json::from_str("{}").expect("metadata");
        assert_eq!(metadata.confidence, None);
    }
}
