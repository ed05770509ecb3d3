use async_trait::async_trait;

use super::{CharacterStore, PgStore};
use crate::{error::Result, models::character::Character};

#[async_trait]
impl CharacterStore for PgStore {
    async fn list_characters(&self) -> Result<Vec<Character>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, name, description, avatar_url, system_prompt, category,
                       created_at, updated_at
                FROM characters
                ORDER BY id
                "#,
                &[],
            )
            .await?;
        rows.iter().map(|r| Character::try_from(r)).collect()
    }

    async fn find_character(&self, character_id: i64) -> Result<Option<Character>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, name, description, avatar_url, system_prompt, category,
                       created_at, updated_at
                FROM characters
                WHERE id = $1
                "#,
                &[&character_id],
            )
            .await?;
        row.as_ref().map(|r| Character::try_from(r)).transpose()
    }

    /// Case-insensitive substring match over name, description and category.
    async fn search_characters(&self, query: &str) -> Result<Vec<Character>> {
        let client = self.pool.get().await?;
        let pattern = format!("%{}%", escape_like(query));
        let rows = client
            .query(
                r#"
                SELECT id, name, description, avatar_url, system_prompt, category,
                       created_at, updated_at
                FROM characters
                WHERE name ILIKE $1 OR description ILIKE $1 OR category ILIKE $1
                ORDER BY id
                "#,
                &[&pattern],
            )
            .await?;
        rows.iter().map(|r| Character::try_from(r)).collect()
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
