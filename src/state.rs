use std::sync::Arc;

use crate::cache::{KvStore, RedisStore};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::repositories::{PgStore, Store};
use crate::services::{
    characters::CharacterCatalog,
    chat::ChatService,
    gateway::{ModelGateway, OllamaGateway},
    rate_limit::RateLimiter,
    response_cache::ResponseCache,
    session::SessionStore,
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Relational persistence.
    pub db: Arc<dyn Store>,
    pub sessions: SessionStore,
    pub limiter: RateLimiter,
    pub characters: CharacterCatalog,
    pub chat: ChatService,
}

impl AppState {
    /// Creates a new `AppState` connected to Postgres, Redis and the model server.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = crate::db::create_pool(&config.database_url)?;
        crate::db::run_migrations(&pool).await?;
        tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");

        let kv = RedisStore::connect(config.redis_url().as_str()).await?;
        tracing::info!("✅ Redis connection manager initialized");

        let gateway = OllamaGateway::from_config(config)
            .map_err(|e| AppError::Internal(format!("Failed to build model client: {}", e)))?;
        tracing::info!(
            "✅ Model gateway ready: {} at {}",
            config.ollama_model,
            config.ollama_base_url
        );

        Ok(Self::assemble(
            config.clone(),
            Arc::new(PgStore::new(pool)),
            Arc::new(kv),
            Arc::new(gateway),
        ))
    }

    /// Wires the services over already-built backends.
    pub fn assemble(
        config: Config,
        db: Arc<dyn Store>,
        kv: Arc<dyn KvStore>,
        gateway: Arc<dyn ModelGateway>,
    ) -> Self {
        let sessions = SessionStore::new(
            kv.clone(),
            config.jwt_secret.clone(),
            config.session_ttl(),
        );
        let limiter = RateLimiter::new(kv.clone());
        let characters = CharacterCatalog::new(db.clone(), kv.clone());
        let responses = ResponseCache::new(kv, config.response_cache_ttl);
        let chat = ChatService::new(db.clone(), gateway, responses);

        Self {
            config: Arc::new(config),
            db,
            sessions,
            limiter,
            characters,
            chat,
        }
    }
}
