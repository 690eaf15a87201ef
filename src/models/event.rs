use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::events::Events;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub difficulty: String,
    /// Minutes.
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub best_season: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub activity_id: u64,
    pub url: String,
    #[serde(default)]
    pub caption: String,
}

/// One logical event of a chat stream.
///
/// The `type` tag and the camelCase field names are the wire contract shared
/// with browser clients; fields the decoder does not know are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "STREAMING_START", rename_all = "camelCase")]
    StreamStart { message_id: String },
    #[serde(rename = "TEXT_MESSAGE_CONTENT", rename_all = "camelCase")]
    TextContent {
        #[serde(rename = "content")]
        text: String,
        #[serde(default)]
        is_complete: bool,
    },
    #[serde(rename = "TOOL_CALL_START", rename_all = "camelCase")]
    ToolExecutionStart { tool_name: String },
    #[serde(rename = "TOOL_CALL_COMPLETE", rename_all = "camelCase")]
    ToolExecutionEnd { tool_name: String },
    #[serde(rename = "ACTIVITIES_FOUND", rename_all = "camelCase")]
    ActivitiesFound {
        activities: Vec<Activity>,
        total_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_query: Option<String>,
    },
    #[serde(rename = "IMAGES_LOADED", rename_all = "camelCase")]
    ImagesLoaded { activity_id: u64, images: Vec<Image> },
    #[serde(rename = "STREAMING_END")]
    StreamEnd,
    #[serde(rename = "ERROR")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::StreamStart { .. } => Events::STREAMING_START,
            StreamEvent::TextContent { .. } => Events::TEXT_MESSAGE_CONTENT,
            StreamEvent::ToolExecutionStart { .. } => Events::TOOL_CALL_START,
            StreamEvent::ToolExecutionEnd { .. } => Events::TOOL_CALL_COMPLETE,
            StreamEvent::ActivitiesFound { .. } => Events::ACTIVITIES_FOUND,
            StreamEvent::ImagesLoaded { .. } => Events::IMAGES_LOADED,
            StreamEvent::StreamEnd => Events::STREAMING_END,
            StreamEvent::Error { .. } => Events::ERROR,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::StreamEnd | StreamEvent::Error { .. })
    }

    pub fn text(text: impl Into<String>, is_complete: bool) -> Self {
        StreamEvent::TextContent {
            text: text.into(),
            is_complete,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            code: None,
        }
    }
}

/// A [`StreamEvent`] plus its envelope: correlation id and unix timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub event: StreamEvent,
}

impl EventFrame {
    pub fn new(event: StreamEvent) -> Self {
        Self {
            id: Some(new_event_id()),
            timestamp: Some(crate::core::time::now_unix()),
            event,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// `data: <json>\n\n`, the framing the producer writes for every event.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown event type: {0}")]
    UnknownType(String),
}

/// Decodes the JSON payload of one `data:` frame.
///
/// Unknown `type` tags are reported separately from malformed payloads so the
/// caller can log them differently; both are skippable.
pub fn decode_frame(data: &str) -> Result<EventFrame, FrameError> {
    let value: Value =
        serde_json::from_str(data).map_err(|err| FrameError::Malformed(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FrameError::Malformed("missing type tag".to_string()))?
        .to_string();
    if !Events::is_known(&kind) {
        return Err(FrameError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|err| FrameError::Malformed(err.to_string()))
}

pub fn new_event_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("evt_{}", &raw[..8])
}

pub fn new_message_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_micros() * 1000);
    format!("msg-{nanos}")
}
