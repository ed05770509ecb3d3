use std::sync::Arc;
use std::time::Duration;

use crate::{
    cache::{keys, KvStore},
    error::{AppError, Result},
    models::character::Character,
    repositories::Store,
};

/// Lifetime of cached character reads.
const CHARACTER_TTL: Duration = Duration::from_secs(24 * 3600);

/// Read-through cache over the character table.
#[derive(Clone)]
pub struct CharacterCatalog {
    db: Arc<dyn Store>,
    kv: Arc<dyn KvStore>,
}

impl CharacterCatalog {
    pub fn new(db: Arc<dyn Store>, kv: Arc<dyn KvStore>) -> Self {
        Self { db, kv }
    }

    pub async fn list(&self) -> Result<Vec<Character>> {
        let key = format!("{}:all", keys::CHARACTER);
        if let Some(characters) = self.cached::<Vec<Character>>(&key).await {
            return Ok(characters);
        }

        let characters = self.db.list_characters().await?;
        self.remember(&key, &characters).await;
        Ok(characters)
    }

    pub async fn get(&self, character_id: i64) -> Result<Character> {
        let key = format!("{}:{}", keys::CHARACTER, character_id);
        if let Some(character) = self.cached::<Character>(&key).await {
            return Ok(character);
        }

        let character = self
            .db
            .find_character(character_id)
            .await?
            .ok_or(AppError::NotFound)?;
        self.remember(&key, &character).await;
        Ok(character)
    }

    /// Case-insensitive search. Not cached.
    pub async fn search(&self, query: &str) -> Result<Vec<Character>> {
        let query = query.trim();
        if query.is_empty() {
            return self.list().await;
        }
        self.db.search_characters(query).await
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => sonic_rs::from_str(&raw)
                .map_err(|e| tracing::warn!("⚠️ Ignoring unreadable cache entry {}: {}", key, e))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("⚠️ Character cache read failed: {}", e);
                None
            }
        }
    }

    async fn remember<T: serde::Serialize>(&self, key: &str, value: &T) {
        let Ok(json) = sonic_rs::to_string(value) else {
            return;
        };
        if let Err(e) = self.kv.set(key, &json, CHARACTER_TTL).await {
            tracing::warn!("⚠️ Character cache write failed: {}", e);
        }
    }
}
