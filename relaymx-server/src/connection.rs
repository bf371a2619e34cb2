//! Connection admission: a global concurrency cap plus a per-IP token
//! bucket, gating accepted sockets before a `ClientConnection` is spawned.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use parking_lot::Mutex;

use crate::config::GeneralConfig;
use crate::metrics::ACTIVE_CONNECTIONS;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub ban_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 100, window: Duration::from_secs(60), ban_duration: Duration::from_secs(300) }
    }
}

struct IpBucket {
    tokens: u32,
    last_refill: Instant,
    banned_until: Option<Instant>,
}

/// Per-IP token bucket with a cooldown ban once the bucket runs dry.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<IpAddr, IpBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(ip).or_insert_with(|| IpBucket {
            tokens: self.config.max_requests,
            last_refill: now,
            banned_until: None,
        });

        if let Some(ban_until) = bucket.banned_until {
            if now < ban_until {
                tracing::warn!(%ip, "connection rejected: ip is banned");
                return false;
            }
            bucket.banned_until = None;
        }

        let elapsed = now.duration_since(bucket.last_refill);
        if elapsed >= self.config.window {
            bucket.tokens = self.config.max_requests;
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            bucket.banned_until = Some(now + self.config.ban_duration);
            tracing::warn!(%ip, ban_duration = ?self.config.ban_duration, "rate limit exceeded, banning ip");
            false
        }
    }
}

/// Admission gate for accepted sockets: a global semaphore bounding
/// `max_connections`, backed by a `RateLimiter` for per-IP abuse.
pub struct ConnectionManager {
    semaphore: Arc<Semaphore>,
    rate_limiter: RateLimiter,
}

impl ConnectionManager {
    pub fn new(general: &GeneralConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(general.max_connections as usize)),
            rate_limiter: RateLimiter::new(RateLimitConfig::default()),
        }
    }

    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        self.rate_limiter.check(ip)
    }

    /// Acquires an *owned* permit (`self.semaphore.clone().acquire_owned()`)
    /// rather than one borrowed from `&self.semaphore`, so the permit can be
    /// moved into a spawned (`'static`) connection task.
    pub async fn acquire(&self) -> Option<ConnectionPermit> {
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => {
                ACTIVE_CONNECTIONS.inc();
                Some(ConnectionPermit { _permit: permit })
            }
            Err(_) => None,
        }
    }
}

pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.dec();
    }
}
