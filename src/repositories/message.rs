use async_trait::async_trait;

use super::{MessageStore, PgStore};
use crate::{
    error::Result,
    models::message::{Message, NewMessage},
};

#[async_trait]
impl MessageStore for PgStore {
    /// Appends a message inside a transaction that also touches the conversation.
    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                r#"
                INSERT INTO messages (conversation_id, role, content, audio_url)
                VALUES ($1, $2, $3, $4)
                RETURNING id, conversation_id, role, content, audio_url, created_at
                "#,
                &[
                    &message.conversation_id,
                    &message.role,
                    &message.content,
                    &message.audio_url,
                ],
            )
            .await?;

        tx.execute(
            "UPDATE conversations SET updated_at = NOW() WHERE id = $1",
            &[&message.conversation_id],
        )
        .await?;

        tx.commit().await?;
        Message::try_from(&row)
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, conversation_id, role, content, audio_url, created_at
                FROM messages
                WHERE conversation_id = $1
                ORDER BY created_at ASC, id ASC
                "#,
                &[&conversation_id],
            )
            .await?;
        rows.iter().map(|r| Message::try_from(r)).collect()
    }
}
