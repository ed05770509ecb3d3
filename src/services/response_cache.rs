use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    cache::{keys, KvStore},
    models::message::Message,
};

/// A completion stored under its fingerprint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CachedTurn {
    pub content: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Canonical form hashed into a fingerprint. Only role and content of each
/// message take part; ids and timestamps do not.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    character_id: i64,
    model: &'a str,
    messages: Vec<(&'a str, &'a str)>,
}

/// Computes the cache key for a (character, model, history) triple.
///
/// # Returns
///
/// A key of the form `ai_response:<blake3 hex>`.
pub fn fingerprint(character_id: i64, model: &str, history: &[Message]) -> String {
    let input = FingerprintInput {
        character_id,
        model,
        messages: history
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect(),
    };

    let mut hasher = blake3::Hasher::new();
    match bincode::serde::encode_to_vec(&input, bincode::config::standard()) {
        Ok(bytes) => {
            hasher.update(&bytes);
        }
        Err(e) => {
            // Length-prefixed fallback keeps the key unambiguous.
            tracing::warn!("⚠️ Fingerprint encoding failed, hashing fields directly: {}", e);
            hasher.update(&character_id.to_le_bytes());
            for part in std::iter::once(model).chain(
                history
                    .iter()
                    .flat_map(|m| [m.role.as_str(), m.content.as_str()]),
            ) {
                hasher.update(&(part.len() as u64).to_le_bytes());
                hasher.update(part.as_bytes());
            }
        }
    }

    format!("{}:{}", keys::AI_RESPONSE, hasher.finalize().to_hex())
}

/// Advisory store of generated replies. Every failure is logged and treated
/// as a miss.
#[derive(Clone)]
pub struct ResponseCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub async fn lookup(&self, key: &str) -> Option<String> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("⚠️ Response cache read failed: {}", e);
                return None;
            }
        };

        match sonic_rs::from_str::<CachedTurn>(&raw) {
            Ok(turn) => {
                tracing::debug!("🎯 Response cache hit: {}", key);
                Some(turn.content)
            }
            Err(e) => {
                tracing::warn!("⚠️ Discarding unreadable cached response: {}", e);
                None
            }
        }
    }

    pub async fn store(&self, key: &str, content: &str, model: &str) {
        let turn = CachedTurn {
            content: content.to_string(),
            model: model.to_string(),
            created_at: Utc::now(),
        };

        let json = match sonic_rs::to_string(&turn) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("⚠️ Failed to encode cached response: {}", e);
                return;
            }
        };

        if let Err(e) = self.kv.set(key, &json, self.ttl).await {
            tracing::warn!("⚠️ Response cache write failed: {}", e);
        }
    }
}
