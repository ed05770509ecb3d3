use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::character::Character;

/// A conversation between one user and one character.
#[derive(Serialize, Clone, Debug)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub character_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub character: Character,
}
