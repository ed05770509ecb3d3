use async_trait::async_trait;
use tokio_postgres::Row;

use super::{ConversationStore, PgStore};
use crate::{
    error::Result,
    models::{character::Character, conversation::Conversation},
};

fn row_to_conversation(row: &Row) -> Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        character_id: row.try_get("character_id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        character: Character::from_row_prefixed(row, "ch_")?,
    })
}

#[async_trait]
impl ConversationStore for PgStore {
    /// Lists a user's conversations, most recently active first.
    async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT c.id, c.user_id, c.character_id, c.title, c.created_at, c.updated_at,
                       ch.id AS ch_id, ch.name AS ch_name, ch.description AS ch_description,
                       ch.avatar_url AS ch_avatar_url, ch.system_prompt AS ch_system_prompt,
                       ch.category AS ch_category, ch.created_at AS ch_created_at,
                       ch.updated_at AS ch_updated_at
                FROM conversations c
                JOIN characters ch ON ch.id = c.character_id
                WHERE c.user_id = $1
                ORDER BY c.updated_at DESC, c.id DESC
                "#,
                &[&user_id],
            )
            .await?;
        rows.iter().map(row_to_conversation).collect()
    }

    async fn find_conversation(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT c.id, c.user_id, c.character_id, c.title, c.created_at, c.updated_at,
                       ch.id AS ch_id, ch.name AS ch_name, ch.description AS ch_description,
                       ch.avatar_url AS ch_avatar_url, ch.system_prompt AS ch_system_prompt,
                       ch.category AS ch_category, ch.created_at AS ch_created_at,
                       ch.updated_at AS ch_updated_at
                FROM conversations c
                JOIN characters ch ON ch.id = c.character_id
                WHERE c.id = $1 AND c.user_id = $2
                "#,
                &[&conversation_id, &user_id],
            )
            .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn create_conversation(
        &self,
        user_id: i64,
        character: &Character,
        title: &str,
    ) -> Result<Conversation> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO conversations (user_id, character_id, title)
                VALUES ($1, $2, $3)
                RETURNING id, user_id, character_id, title, created_at, updated_at
                "#,
                &[&user_id, &character.id, &title],
            )
            .await?;

        tracing::info!("✅ Conversation created with ID: {}", row.try_get::<_, i64>("id")?);

        Ok(Conversation {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            character_id: row.try_get("character_id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            character: character.clone(),
        })
    }

    async fn delete_conversation(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM conversations WHERE id = $1 AND user_id = $2",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_conversations(&self, conversation_ids: &[i64], user_id: i64) -> Result<u64> {
        let client = self.pool.get().await?;
        let ids = conversation_ids.to_vec();
        let deleted = client
            .execute(
                "DELETE FROM conversations WHERE id = ANY($1) AND user_id = $2",
                &[&ids, &user_id],
            )
            .await?;
        Ok(deleted)
    }
}
