use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::error::AppError;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "message_role")]
pub enum MessageRole {
    #[postgres(name = "user")]
    User,
    #[postgres(name = "assistant")]
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One persisted entry of a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to append a message.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub audio_url: Option<String>,
}

impl NewMessage {
    pub fn user(conversation_id: i64, content: String, audio_url: Option<String>) -> Self {
        Self {
            conversation_id,
            role: MessageRole::User,
            content,
            audio_url,
        }
    }

    pub fn assistant(conversation_id: i64, content: String) -> Self {
        Self {
            conversation_id,
            role: MessageRole::Assistant,
            content,
            audio_url: None,
        }
    }
}

impl TryFrom<&Row> for Message {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            audio_url: row.try_get("audio_url")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
