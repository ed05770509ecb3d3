use std::env;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// How a rate-limit scope derives the identity it counts against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityKey {
    /// Always the peer IP address.
    Ip,
    /// The authenticated user when present, the peer IP otherwise.
    UserOrIp,
    /// The authenticated user. Falls back to IP if the route is reached unauthenticated.
    User,
}

impl FromStr for IdentityKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(Self::Ip),
            "user_or_ip" => Ok(Self::UserOrIp),
            "user" => Ok(Self::User),
            other => anyhow::bail!("unknown rate limit identity '{}'", other),
        }
    }
}

/// One named quota: at most `limit` calls per `window` for a single identity.
#[derive(Clone, Debug)]
pub struct RateScope {
    pub name: &'static str,
    pub limit: u32,
    pub window: Duration,
    pub key_by: IdentityKey,
}

/// The three scopes applied by the HTTP layer.
#[derive(Clone, Debug)]
pub struct RateLimits {
    pub global: RateScope,
    pub api: RateScope,
    pub ai_chat: RateScope,
}

/// Argon2id cost parameters used when hashing new passwords.
#[derive(Clone, Copy, Debug)]
pub struct HashingCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// Redis host.
    pub redis_host: String,
    /// Redis port.
    pub redis_port: u16,
    /// Redis password, empty when the server has no AUTH.
    pub redis_password: Zeroizing<String>,
    /// Redis logical database index.
    pub redis_db: i64,
    /// HMAC secret used to sign session tokens.
    pub jwt_secret: Zeroizing<Vec<u8>>,
    /// The duration of a session in days.
    pub session_duration_days: i64,
    /// Base URL of the Ollama-compatible model server.
    pub ollama_base_url: String,
    /// Model name sent with every chat request.
    pub ollama_model: String,
    /// Timeout for a non-streaming completion.
    pub model_timeout: Duration,
    /// Maximum silence between two chunks of a streamed completion.
    pub stream_idle_timeout: Duration,
    /// How long a generated reply stays in the response cache.
    pub response_cache_ttl: Duration,
    pub rate_limits: RateLimits,
    pub password_hashing: HashingCost,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a `Config` from an arbitrary key lookup.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the raw value for a variable name, or `None` when unset.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`, or an error naming the offending variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .context("JWT_SECRET must be set (generate with: openssl rand -hex 32)")?;

        if jwt_secret.len() < 16 {
            anyhow::bail!("JWT_SECRET must be at least 16 bytes long");
        }

        let window = Duration::from_secs(parse_or(&lookup, "RATE_LIMIT_WINDOW_SECS", 60)?);

        let rate_limits = RateLimits {
            global: RateScope {
                name: "global",
                limit: parse_or(&lookup, "RATE_LIMIT_GLOBAL", 100)?,
                window,
                key_by: parse_or(&lookup, "RATE_LIMIT_GLOBAL_KEY", IdentityKey::Ip)?,
            },
            api: RateScope {
                name: "api",
                limit: parse_or(&lookup, "RATE_LIMIT_API", 60)?,
                window,
                key_by: parse_or(&lookup, "RATE_LIMIT_API_KEY", IdentityKey::UserOrIp)?,
            },
            ai_chat: RateScope {
                name: "ai_chat",
                limit: parse_or(&lookup, "RATE_LIMIT_AI_CHAT", 10)?,
                window,
                key_by: parse_or(&lookup, "RATE_LIMIT_AI_CHAT_KEY", IdentityKey::User)?,
            },
        };

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_host: lookup("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            redis_port: parse_or(&lookup, "REDIS_PORT", 6379)?,
            redis_password: Zeroizing::new(lookup("REDIS_PASSWORD").unwrap_or_default()),
            redis_db: parse_or(&lookup, "REDIS_DB", 0)?,
            jwt_secret: Zeroizing::new(jwt_secret.into_bytes()),
            session_duration_days: parse_or(&lookup, "SESSION_DURATION_DAYS", 7)?,
            ollama_base_url: lookup("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama2".to_string()),
            model_timeout: Duration::from_secs(parse_or(&lookup, "MODEL_TIMEOUT_SECS", 30)?),
            stream_idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STREAM_IDLE_TIMEOUT_SECS",
                120,
            )?),
            response_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "RESPONSE_CACHE_TTL_SECS",
                3600,
            )?),
            rate_limits,
            password_hashing: HashingCost {
                memory_kib: parse_or(&lookup, "ARGON2_MEMORY_KIB", 19 * 1024)?,
                iterations: parse_or(&lookup, "ARGON2_ITERATIONS", 3)?,
                parallelism: parse_or(&lookup, "ARGON2_PARALLELISM", 1)?,
            },
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            allowed_origins,
        })
    }

    /// Redis connection URL assembled from host, port, password and database index.
    pub fn redis_url(&self) -> Zeroizing<String> {
        let auth = if self.redis_password.is_empty() {
            String::new()
        } else {
            format!(":{}@", self.redis_password.as_str())
        };
        Zeroizing::new(format!(
            "redis://{}{}:{}/{}",
            auth, self.redis_host, self.redis_port, self.redis_db
        ))
    }

    /// Lifetime of a session and of the token that backs it.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_duration_days.max(1) as u64 * 86_400)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        _ => Ok(default),
    }
}
