use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    cache::{keys, KvStore},
    error::{AppError, Result},
    models::session::{Claims, Session},
};

/// Issues, validates and revokes bearer sessions.
///
/// A token is only accepted while its record exists under `session:<token>`,
/// so revocation takes effect on the very next request. The user's most
/// recent session is mirrored under `session:user:<id>`.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    secret: Arc<Zeroizing<Vec<u8>>>,
    ttl: Duration,
}

fn token_key(token: &str) -> String {
    format!("{}:{}", keys::SESSION, token)
}

fn user_key(user_id: i64) -> String {
    format!("{}:user:{}", keys::SESSION, user_id)
}

fn unauthenticated(reason: &str) -> AppError {
    AppError::Unauthenticated(reason.to_string())
}

impl SessionStore {
    /// Creates a new `SessionStore`.
    ///
    /// # Arguments
    ///
    /// * `kv` - The backing key-value store.
    /// * `secret` - HMAC key for signing tokens.
    /// * `ttl` - Lifetime of both the token and its record.
    pub fn new(kv: Arc<dyn KvStore>, secret: Zeroizing<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            kv,
            secret: Arc::new(secret),
            ttl,
        }
    }

    /// Signs a fresh token for `user_id`.
    pub fn mint(&self, user_id: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id,
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_slice()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign session token: {}", e)))
    }

    /// Stores the session record for `token` and refreshes the user's aggregate.
    ///
    /// # Returns
    ///
    /// The stored `Session`.
    pub async fn issue(&self, user_id: i64, token: &str) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            token: token.to_string(),
            user_id,
            last_seen: now,
            created_at: now,
        };

        self.write(&token_key(token), &session).await?;
        self.write(&user_key(user_id), &session).await?;

        tracing::info!("✅ Session issued for user: {}", user_id);
        Ok(session)
    }

    /// Resolves a bearer token to its session.
    ///
    /// Any failure, including a store outage, is reported as `Unauthenticated`.
    /// A record whose token no longer verifies is deleted on the spot.
    pub async fn validate(&self, token: &str) -> Result<Session> {
        if token.is_empty() {
            return Err(unauthenticated("Missing session token"));
        }

        let key = token_key(token);
        let raw = match self.kv.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(unauthenticated("Session not found")),
            Err(e) => {
                tracing::warn!("❌ Session lookup failed: {}", e);
                return Err(unauthenticated("Session lookup failed"));
            }
        };

        let record: Session = match sonic_rs::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("❌ Invalid session JSON: {}", e);
                self.discard(&key).await;
                return Err(unauthenticated("Invalid session"));
            }
        };

        let claims = match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_slice()),
            &Validation::new(Algorithm::HS256),
        ) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::warn!("❌ Session token rejected: {}", e);
                self.discard(&key).await;
                return Err(unauthenticated("Invalid or expired token"));
            }
        };

        if claims.user_id != record.user_id {
            tracing::warn!(
                "❌ Session record for user {} carries token for user {}",
                record.user_id,
                claims.user_id
            );
            self.discard(&key).await;
            return Err(unauthenticated("Invalid session"));
        }

        let session = Session {
            last_seen: Utc::now(),
            ..record
        };

        if let Err(e) = self.write(&user_key(session.user_id), &session).await {
            tracing::warn!("⚠️ Failed to refresh last_seen for user {}: {}", session.user_id, e);
        }

        tracing::debug!("✅ User authenticated: {}", session.user_id);
        Ok(session)
    }

    /// Deletes the record for `token`. Unknown tokens are not an error.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        self.kv.delete(&token_key(token)).await?;
        tracing::info!("👋 Session revoked");
        Ok(())
    }

    /// Drops the user's session aggregate. Token records are left to expire.
    pub async fn revoke_all(&self, user_id: i64) -> Result<()> {
        self.kv.delete(&user_key(user_id)).await?;
        tracing::info!("👋 Session aggregate cleared for user: {}", user_id);
        Ok(())
    }

    /// The user's most recently observed session, if any.
    pub async fn user_session(&self, user_id: i64) -> Result<Option<Session>> {
        let Some(raw) = self.kv.get(&user_key(user_id)).await? else {
            return Ok(None);
        };
        match sonic_rs::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!("⚠️ Dropping unreadable session aggregate: {}", e);
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, session: &Session) -> Result<()> {
        let json = sonic_rs::to_string(session)
            .map_err(|e| AppError::Internal(format!("Session serialization failed: {}", e)))?;
        self.kv.set(key, &json, self.ttl).await?;
        Ok(())
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.kv.delete(key).await {
            tracing::warn!("⚠️ Failed to delete stale session: {}", e);
        }
    }
}
