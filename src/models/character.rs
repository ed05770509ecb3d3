use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::error::AppError;

/// A persona the model plays in a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Character {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub avatar_url: String,
    /// Prepended to every chat request as the system message.
    pub system_prompt: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    /// Reads a character from a row whose columns carry `prefix`.
    pub fn from_row_prefixed(row: &Row, prefix: &str) -> Result<Self, AppError> {
        let col = |name: &str| format!("{}{}", prefix, name);
        Ok(Character {
            id: row.try_get(col("id").as_str())?,
            name: row.try_get(col("name").as_str())?,
            description: row.try_get(col("description").as_str())?,
            avatar_url: row.try_get(col("avatar_url").as_str())?,
            system_prompt: row.try_get(col("system_prompt").as_str())?,
            category: row.try_get(col("category").as_str())?,
            created_at: row.try_get(col("created_at").as_str())?,
            updated_at: row.try_get(col("updated_at").as_str())?,
        })
    }
}

impl TryFrom<&Row> for Character {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Character::from_row_prefixed(row, "")
    }
}
