use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session metadata stored under `session:<token>` and, as the user's
/// aggregate, under `session:user:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// The bearer token this session was issued for.
    pub token: String,
    /// The ID of the user this session belongs to.
    pub user_id: i64,
    /// Last time a request authenticated with this session.
    pub last_seen: DateTime<Utc>,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
}

/// Public view of a `Session`. Never carries the token.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            last_seen: session.last_seen,
            created_at: session.created_at,
        }
    }
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub iat: i64,
    pub exp: i64,
    /// Random nonce so two tokens minted in the same second differ.
    pub jti: String,
}

/// The authenticated caller, inserted into request extensions by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: i64,
    pub token: String,
}
