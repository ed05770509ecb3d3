use async_trait::async_trait;

use super::{PgStore, UserStore};
use crate::{
    error::Result,
    models::user::{NewUser, User},
};

#[async_trait]
impl UserStore for PgStore {
    /// Creates a new user in the database.
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO users (username, email, password_hash)
                VALUES ($1, $2, $3)
                RETURNING id, username, email, password_hash, created_at, updated_at
                "#,
                &[&user.username, &user.email, &user.password_hash],
            )
            .await?;
        User::try_from(&row)
    }

    /// Finds a user by their email address.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, username, email, password_hash, created_at, updated_at
                FROM users
                WHERE lower(email) = lower($1)
                "#,
                &[&email],
            )
            .await?;
        row.as_ref().map(|r| User::try_from(r)).transpose()
    }

    /// Finds a user by their ID.
    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, username, email, password_hash, created_at, updated_at
                FROM users
                WHERE id = $1
                "#,
                &[&user_id],
            )
            .await?;
        row.as_ref().map(|r| User::try_from(r)).transpose()
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)",
                &[&username],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn email_taken(&self, email: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = lower($1))",
                &[&email],
            )
            .await?;
        Ok(row.try_get(0)?)
    }
}
