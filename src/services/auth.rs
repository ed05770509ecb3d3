use crate::config::HashingCost;
use crate::error::{AppError, Result};
use crate::models::user::{NewUser, User};
use crate::repositories::Store;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Hashes a password using Argon2id.
///
/// # Arguments
///
/// * `password` - The password to hash.
/// * `cost` - Memory, time and parallelism parameters.
///
/// # Returns
///
/// A `Result` containing the PHC-encoded hash.
fn hash_password(password: &[u8], cost: HashingCost) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        ParamsBuilder::new()
            .m_cost(cost.memory_kib)
            .t_cost(cost.iterations)
            .p_cost(cost.parallelism)
            .build()
            .map_err(|e| AppError::Internal(format!("Argon2 params: {}", e)))?,
    );

    let password_hash = argon2
        .hash_password(password, &salt)
        .map_err(|e| AppError::Internal(format!("Argon2 hash error: {}", e)))?
        .to_string();

    tracing::debug!("Password hashed successfully with Argon2");
    Ok(password_hash)
}

/// Verifies a password against a hash. The hash carries its own parameters.
///
/// # Returns
///
/// A `Result` containing `true` if the password is valid, `false` otherwise.
fn verify_password(password: &[u8], hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Hash parse error: {}", e)))?;
    let result = Argon2::default()
        .verify_password(password, &parsed_hash)
        .is_ok();

    tracing::debug!("Password verification completed");
    Ok(result)
}

/// Runs Argon2 work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
}

/// Creates a new user.
///
/// # Arguments
///
/// * `db` - The user store.
/// * `username` - The user's username.
/// * `email` - The user's email address.
/// * `password` - The user's password.
/// * `cost` - Argon2 parameters for the new hash.
///
/// # Returns
///
/// A `Result` containing the created `User`, or `Conflict` if the username or email is taken.
pub async fn create_user(
    db: &dyn Store,
    username: String,
    email: String,
    password: String,
    cost: HashingCost,
) -> Result<User> {
    tracing::debug!("🔐 Creating user: {}", username);
    let password = Zeroizing::new(password);

    if db.username_taken(&username).await? {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }
    if db.email_taken(&email).await? {
        return Err(AppError::Conflict("Email already exists".to_string()));
    }

    let password_hash = blocking(move || hash_password(password.as_bytes(), cost)).await?;

    let user = db
        .create_user(NewUser {
            username,
            email,
            password_hash,
        })
        .await?;

    tracing::info!("✅ User created with ID: {}", user.id);
    Ok(user)
}

/// Authenticates a user by email and password.
///
/// Unknown emails and wrong passwords fail with the same message.
pub async fn authenticate_user(db: &dyn Store, email: &str, password: String) -> Result<User> {
    tracing::debug!("🔐 Authenticating user: {}", email);
    let password = Zeroizing::new(password);

    let user = db
        .find_user_by_email(email)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid email or password".to_string()))?;

    let hash = user.password_hash.clone();
    if !blocking(move || verify_password(password.as_bytes(), &hash)).await? {
        return Err(AppError::Unauthenticated(
            "Invalid email or password".to_string(),
        ));
    }

    tracing::info!("✅ User authenticated: {}", user.id);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryDatabase;

    const CHEAP: HashingCost = HashingCost {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn hash_round_trip() {
        let hash = hash_password(b"secret1", CHEAP).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(b"secret1", &hash).unwrap());
        assert!(!verify_password(b"secret2", &hash).unwrap());
    }

    #[tokio::test]
    async fn duplicate_username_or_email_conflicts() {
        let db = MemoryDatabase::new();
        create_user(&db, "alice".into(), "alice@example.com".into(), "secret1".into(), CHEAP)
            .await
            .unwrap();

        let same_name =
            create_user(&db, "alice".into(), "other@example.com".into(), "secret1".into(), CHEAP)
                .await;
        assert!(matches!(same_name, Err(AppError::Conflict(_))));

        let same_email =
            create_user(&db, "alice2".into(), "ALICE@example.com".into(), "secret1".into(), CHEAP)
                .await;
        assert!(matches!(same_email, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn login_checks_password() {
        let db = MemoryDatabase::new();
        create_user(&db, "bob".into(), "bob@example.com".into(), "hunter22".into(), CHEAP)
            .await
            .unwrap();

        assert!(authenticate_user(&db, "bob@example.com", "hunter22".into()).await.is_ok());
        assert!(matches!(
            authenticate_user(&db, "bob@example.com", "wrong".into()).await,
            Err(AppError::Unauthenticated(_))
        ));
        assert!(matches!(
            authenticate_user(&db, "nobody@example.com", "hunter22".into()).await,
            Err(AppError::Unauthenticated(_))
        ));
    }
}
