//! Relational persistence. Each entity gets a trait so the chat pipeline can
//! run over Postgres in production and an in-process store in tests.

use async_trait::async_trait;
use deadpool_postgres::Pool;

use crate::error::Result;
use crate::models::{
    character::Character,
    conversation::Conversation,
    message::{Message, NewMessage},
    user::{NewUser, User},
};

pub mod character;
pub mod conversation;
pub mod memory;
pub mod message;
pub mod user;

pub use memory::MemoryDatabase;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>>;
    async fn username_taken(&self, username: &str) -> Result<bool>;
    async fn email_taken(&self, email: &str) -> Result<bool>;
}

#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn list_characters(&self) -> Result<Vec<Character>>;
    async fn find_character(&self, character_id: i64) -> Result<Option<Character>>;
    async fn search_characters(&self, query: &str) -> Result<Vec<Character>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>>;
    /// Returns the conversation only if `user_id` owns it.
    async fn find_conversation(&self, conversation_id: i64, user_id: i64)
        -> Result<Option<Conversation>>;
    async fn create_conversation(
        &self,
        user_id: i64,
        character: &Character,
        title: &str,
    ) -> Result<Conversation>;
    /// Returns `false` when nothing owned by `user_id` matched.
    async fn delete_conversation(&self, conversation_id: i64, user_id: i64) -> Result<bool>;
    async fn delete_conversations(&self, conversation_ids: &[i64], user_id: i64) -> Result<u64>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message and bumps its conversation's `updated_at`.
    async fn create_message(&self, message: NewMessage) -> Result<Message>;
    /// Full history in append order.
    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>>;
}

/// Everything the service persists.
pub trait Store: UserStore + CharacterStore + ConversationStore + MessageStore {}

impl<T> Store for T where T: UserStore + CharacterStore + ConversationStore + MessageStore {}

/// Postgres-backed `Store`. Each entity's queries live in their own module.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}
