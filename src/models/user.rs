use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Row;

use crate::error::AppError;

/// Represents a user in the system.
#[derive(Serialize, Clone, Debug)]
pub struct User {
    /// The unique identifier for the user.
    pub id: i64,
    /// The user's username.
    pub username: String,
    /// The user's email address.
    pub email: String,
    /// The user's Argon2id password hash. Never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the user was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a user.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl TryFrom<&Row> for User {
    type Error = AppError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
