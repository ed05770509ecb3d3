use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{CharacterStore, ConversationStore, MessageStore, UserStore};
use crate::{
    error::{AppError, Result},
    models::{
        character::Character,
        conversation::Conversation,
        message::{Message, NewMessage},
        user::{NewUser, User},
    },
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    characters: BTreeMap<i64, Character>,
    conversations: BTreeMap<i64, Conversation>,
    messages: BTreeMap<i64, Message>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process `Store` with the same ownership and ordering rules as the
/// Postgres schema. Seeded with the default characters.
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        let now = Utc::now();
        let characters = default_characters()
            .into_iter()
            .map(|(id, name, description, system_prompt, category)| {
                (
                    id,
                    Character {
                        id,
                        name: name.to_string(),
                        description: description.to_string(),
                        avatar_url: format!("/avatars/{}.png", name.to_lowercase()),
                        system_prompt: system_prompt.to_string(),
                        category: category.to_string(),
                        created_at: now,
                        updated_at: now,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        Self {
            tables: RwLock::new(Tables {
                characters,
                next_id: 100,
                ..Tables::default()
            }),
        }
    }
}

/// Same rows as the migration seed.
fn default_characters() -> Vec<(i64, &'static str, &'static str, &'static str, &'static str)> {
    vec![
        (
            1,
            "Socrates",
            "Classical Athenian philosopher who answers questions with questions.",
            "You are Socrates. Guide the user toward insight through patient questioning.",
            "philosophy",
        ),
        (
            2,
            "Ada",
            "Mathematician and first programmer, fascinated by analytical engines.",
            "You are Ada Lovelace. Explain ideas with precision and poetic curiosity.",
            "science",
        ),
        (
            3,
            "Holmes",
            "Consulting detective with an eye for the smallest detail.",
            "You are Sherlock Holmes. Reason aloud from observation to deduction.",
            "fiction",
        ),
    ]
}

#[async_trait]
impl UserStore for MemoryDatabase {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|u| u.username == user.username || u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(AppError::Conflict("User already exists".to_string()));
        }

        let now = Utc::now();
        let id = tables.next_id();
        let created = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(id, created.clone());
        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().any(|u| u.username == username))
    }

    async fn email_taken(&self, email: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email)))
    }
}

#[async_trait]
impl CharacterStore for MemoryDatabase {
    async fn list_characters(&self) -> Result<Vec<Character>> {
        Ok(self.tables.read().await.characters.values().cloned().collect())
    }

    async fn find_character(&self, character_id: i64) -> Result<Option<Character>> {
        Ok(self.tables.read().await.characters.get(&character_id).cloned())
    }

    async fn search_characters(&self, query: &str) -> Result<Vec<Character>> {
        let needle = query.to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .characters
            .values()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c.description.to_lowercase().contains(&needle)
                    || c.category.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryDatabase {
    async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>> {
        let tables = self.tables.read().await;
        let mut owned: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(owned)
    }

    async fn find_conversation(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Option<Conversation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .conversations
            .get(&conversation_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn create_conversation(
        &self,
        user_id: i64,
        character: &Character,
        title: &str,
    ) -> Result<Conversation> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let id = tables.next_id();
        let conversation = Conversation {
            id,
            user_id,
            character_id: character.id,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
            character: character.clone(),
        };
        tables.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn delete_conversation(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        let deleted = self
            .delete_conversations(&[conversation_id], user_id)
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_conversations(&self, conversation_ids: &[i64], user_id: i64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let doomed: Vec<i64> = conversation_ids
            .iter()
            .copied()
            .filter(|id| {
                tables
                    .conversations
                    .get(id)
                    .is_some_and(|c| c.user_id == user_id)
            })
            .collect();

        for id in &doomed {
            tables.conversations.remove(id);
        }
        tables
            .messages
            .retain(|_, m| !doomed.contains(&m.conversation_id));

        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl MessageStore for MemoryDatabase {
    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let conversation = tables
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(AppError::NotFound)?;
        conversation.updated_at = now;

        let id = tables.next_id();
        let created = Message {
            id,
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            audio_url: message.audio_url,
            created_at: now,
        };
        tables.messages.insert(id, created.clone());
        Ok(created)
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut history: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(history)
    }
}
