use serde::{Deserialize, Serialize};

use crate::models::event::{Activity, Image};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Error,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Error => "error",
        }
    }
}

/// One entry of the consumer's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub images: Vec<Image>,
    pub is_streaming: bool,
    pub created_at: String,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self::local(MessageRole::User, content)
    }

    pub fn error(content: &str) -> Self {
        Self::local(MessageRole::Error, content)
    }

    /// Empty assistant message that stream content is folded into.
    pub fn assistant(id: &str) -> Self {
        Self {
            id: id.to_string(),
            role: MessageRole::Assistant,
            content: String::new(),
            activities: Vec::new(),
            images: Vec::new(),
            is_streaming: true,
            created_at: crate::core::time::now_rfc3339(),
        }
    }

    fn local(role: MessageRole, content: &str) -> Self {
        Self {
            id: format!("{}-{}", role.as_str(), uuid::Uuid::new_v4()),
            role,
            content: content.to_string(),
            activities: Vec::new(),
            images: Vec::new(),
            is_streaming: false,
            created_at: crate::core::time::now_rfc3339(),
        }
    }
}
