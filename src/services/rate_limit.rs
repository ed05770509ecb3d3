use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    cache::{keys, KvStore},
    config::RateScope,
};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Time until the current window closes.
    pub reset_in: Duration,
}

impl Decision {
    /// Whole seconds a rejected caller should wait, never more than the window.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_in.as_secs();
        if self.reset_in.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

/// Fixed-window counters kept in the shared store.
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Counts one call for `identity` in `scope`.
    ///
    /// The first call of a window creates the counter with the window as its
    /// expiry; later calls do not extend it. A store failure admits the call.
    ///
    /// # Arguments
    ///
    /// * `identity` - Who is calling, e.g. `user:42` or an IP address.
    /// * `scope` - Which quota to charge.
    pub async fn admit(&self, identity: &str, scope: &RateScope) -> Decision {
        let key = format!("{}:{}:{}", keys::RATE_LIMIT, scope.name, identity);

        match self.kv.increment(&key, scope.window).await {
            Ok(counter) => {
                let reset_in = counter.ttl.min(scope.window);
                let allowed = counter.count <= u64::from(scope.limit);
                let remaining = u64::from(scope.limit).saturating_sub(counter.count) as u32;

                if !allowed {
                    tracing::debug!(
                        "🚫 {} over {} quota ({}/{})",
                        identity,
                        scope.name,
                        counter.count,
                        scope.limit
                    );
                }

                Decision {
                    allowed,
                    limit: scope.limit,
                    remaining,
                    reset_at: reset_at(reset_in),
                    reset_in,
                }
            }
            Err(e) => {
                tracing::warn!("⚠️ Rate limiter unavailable, admitting {}: {}", identity, e);
                Decision {
                    allowed: true,
                    limit: scope.limit,
                    remaining: scope.limit,
                    reset_at: reset_at(scope.window),
                    reset_in: scope.window,
                }
            }
        }
    }
}

fn reset_at(reset_in: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(reset_in).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + delta
}
