use std::io::BufRead;
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{NewsqError, Result};
use crate::model::{AnswerMetadata, ArticleSource, StructuredAnswer, deserialize_optional_percent};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct FrameBuilder {
    event_type: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl FrameBuilder {
    fn push_field(&mut self, line: &str) {
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()).filter(|v| !v.is_empty()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.id = Some(value.to_string()).filter(|v| !v.is_empty()),
            _ => {}
        }
    }

    fn take(&mut self) -> Option<SseFrame> {
        let builder = std::mem::take(self);
        if builder.data_lines.is_empty() {
            return None;
        }

        Some(SseFrame {
            event_type: builder.event_type,
            data: builder.data_lines.join("\n"),
            id: builder.id,
        })
    }
}

/// Reads server-sent event frames from `reader`, calling `on_frame` for each
/// dispatched frame in arrival order.
///
/// Returning `Ok(false)` from the callback stops reading early.
pub fn parse_sse_reader<R, F>(path: &Path, mut reader: R, mut on_frame: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(SseFrame) -> Result<bool>,
{
    let mut builder = FrameBuilder::default();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|source| NewsqError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if bytes == 0 {
            break;
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if let Some(frame) = builder.take()
                && !on_frame(frame)?
            {
                return Ok(());
            }
            continue;
        }
        if trimmed.starts_with(':') {
            continue;
        }

        builder.push_field(trimmed);
    }

    if let Some(frame) = builder.take() {
        on_frame(frame)?;
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Metadata(AnswerMetadata),
    Sources(Vec<ArticleSource>),
    Status(String),
    Tldr(String),
    Details(String),
    Token(String),
    Structured(StructuredAnswer),
    Done(DonePayload),
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    #[serde(default, deserialize_with = "deserialize_optional_percent")]
    pub confidence: Option<u8>,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata",
            Self::Sources(_) => "sources",
            Self::Status(_) => "status",
            Self::Tldr(_) => "tldr",
            Self::Details(_) => "details",
            Self::Token(_) => "token",
            Self::Structured(_) => "structured",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }

    /// Decodes one frame. Unknown event types yield `Ok(None)`.
    pub fn from_frame(frame: &SseFrame) -> Result<Option<Self>> {
        let named = frame
            .event_type
            .as_deref()
            .filter(|name| *name != "message");

        let (event_type, payload) = if let Some(name) = named {
            let payload = if frame.data.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str::<Value>(&frame.data)
                    .unwrap_or_else(|_| Value::String(frame.data.clone()))
            };
            (name.to_string(), payload)
        } else {
            let envelope = serde_json::from_str::<Value>(&frame.data).map_err(|source| {
                NewsqError::InvalidEvent {
                    event: "message".to_string(),
                    source,
                }
            })?;
            let Some(event_type) = envelope.get("type").and_then(Value::as_str) else {
                return Err(NewsqError::StreamProtocol(
                    "event envelope is missing a `type` tag".to_string(),
                ));
            };
            let event_type = event_type.to_string();
            (event_type, envelope_payload(envelope))
        };

        Self::from_parts(&event_type, payload)
    }

    pub fn from_parts(event_type: &str, payload: Value) -> Result<Option<Self>> {
        let event = match event_type {
            "metadata" => Self::Metadata(decode(event_type, payload)?),
            "sources" => Self::Sources(decode(event_type, payload)?),
            "status" => Self::Status(decode_text(event_type, payload)?),
            "tldr" => Self::Tldr(decode_text(event_type, payload)?),
            "details" => Self::Details(decode_text(event_type, payload)?),
            "token" => Self::Token(decode_text(event_type, payload)?),
            "structured" => Self::Structured(decode(event_type, payload)?),
            "done" => {
                if payload.is_object() {
                    Self::Done(decode(event_type, payload)?)
                } else {
                    Self::Done(DonePayload::default())
                }
            }
            "error" => Self::Error(decode_error_message(payload)),
            other => {
                tracing::debug!(event_type = other, "skipping unknown stream event");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}

// Envelopes without a `data` key carry their payload inline next to `type`.
fn envelope_payload(envelope: Value) -> Value {
    match envelope {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => {
                map.remove("type");
                Value::Object(map)
            }
        },
        _ => Value::Null,
    }
}

fn decode<T: DeserializeOwned>(event_type: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|source| NewsqError::InvalidEvent {
        event: event_type.to_string(),
        source,
    })
}

fn decode_text(event_type: &str, payload: Value) -> Result<String> {
    if payload.is_null() {
        return Ok(String::new());
    }
    if let Some(text) = payload
        .get("content")
        .or_else(|| payload.get("text"))
        .and_then(Value::as_str)
    {
        return Ok(text.to_string());
    }
    decode(event_type, payload)
}

fn decode_error_message(payload: Value) -> String {
    match payload {
        Value::String(message) if !message.trim().is_empty() => message,
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.trim().is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown stream error".to_string()),
        _ => "unknown stream error".to_string(),
    }
}
