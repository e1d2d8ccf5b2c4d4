//! Sliding-window admission counters.
//!
//! Two backends with different window semantics, both safe under concurrent
//! requests:
//!
//! * **Memory** — exact sliding log: per-key sorted timestamps pruned to the
//!   trailing window. A request is admitted iff fewer than `limit` events
//!   remain after pruning. No boundary anomalies.
//! * **Redis** — weighted two-bucket approximation: one atomic INCR+EXPIRE
//!   round trip per request against the current fixed bucket, with the
//!   previous bucket's count weighted by the elapsed fraction of the window.
//!   Cheap and shared across instances, but can admit up to roughly twice
//!   `limit` requests straddling a bucket edge in the worst case.
//!
//! When redis cannot answer inside the configured timeout the decision falls
//! back to a local exact log and the decision is flagged so the caller can
//! record the fallback — never a silent fail-open or fail-closed.

use chrono::Utc;
use dashmap::DashMap;
use log::warn;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one admission check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Count observed in the window, including this request.
    pub count: u64,
    pub limit: u64,
    /// True when the shared store was unreachable and a local counter decided.
    pub fallback: bool,
}

/// Exact sliding log for one client key.
#[derive(Debug, Default)]
pub struct SlidingWindowEntry {
    requests: Vec<Instant>,
}

impl SlidingWindowEntry {
    /// Prune to the trailing window, then admit iff under the limit.
    fn admit(&mut self, limit: u64, window: Duration) -> (bool, u64) {
        let now = Instant::now();
        let cutoff = now.checked_sub(window);
        if let Some(cutoff) = cutoff {
            self.requests.retain(|&t| t > cutoff);
        }

        if (self.requests.len() as u64) < limit {
            self.requests.push(now);
            (true, self.requests.len() as u64)
        } else {
            (false, self.requests.len() as u64 + 1)
        }
    }

    fn is_idle(&self, window: Duration) -> bool {
        match Instant::now().checked_sub(window) {
            Some(cutoff) => self.requests.iter().all(|&t| t <= cutoff),
            None => false,
        }
    }
}

#[derive(Clone)]
pub enum RateLimitStorage {
    Memory {
        windows: Arc<DashMap<String, SlidingWindowEntry>>,
    },
    Redis {
        connection_manager: Arc<redis::aio::ConnectionManager>,
        key_prefix: String,
        timeout: Duration,
        /// Local exact log used while the shared store is unreachable.
        local_fallback: Arc<DashMap<String, SlidingWindowEntry>>,
    },
}

impl RateLimitStorage {
    pub fn new_memory() -> Self {
        Self::Memory {
            windows: Arc::new(DashMap::new()),
        }
    }

    pub async fn new_redis(
        redis_url: &str,
        key_prefix: &str,
        timeout: Duration,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection_manager = redis::aio::ConnectionManager::new(client).await?;

        log::info!("Redis connection established for rate limiting");

        Ok(Self::Redis {
            connection_manager: Arc::new(connection_manager),
            key_prefix: key_prefix.to_string(),
            timeout,
            local_fallback: Arc::new(DashMap::new()),
        })
    }

    /// Decide whether one more request from `client_key` fits in the window.
    pub async fn allow(&self, client_key: &str, limit: u64, window: Duration) -> RateDecision {
        match self {
            Self::Memory { windows } => {
                let (allowed, count) = Self::admit_local(windows, client_key, limit, window);
                RateDecision {
                    allowed,
                    count,
                    limit,
                    fallback: false,
                }
            }
            Self::Redis {
                connection_manager,
                key_prefix,
                timeout,
                local_fallback,
            } => {
                match Self::admit_redis(
                    connection_manager,
                    key_prefix,
                    client_key,
                    limit,
                    window,
                    *timeout,
                )
                .await
                {
                    Ok((allowed, count)) => RateDecision {
                        allowed,
                        count,
                        limit,
                        fallback: false,
                    },
                    Err(e) => {
                        warn!(
                            "Shared rate counter unavailable for {} ({}); using local counter",
                            client_key, e
                        );
                        let (allowed, count) =
                            Self::admit_local(local_fallback, client_key, limit, window);
                        RateDecision {
                            allowed,
                            count,
                            limit,
                            fallback: true,
                        }
                    }
                }
            }
        }
    }

    fn admit_local(
        windows: &Arc<DashMap<String, SlidingWindowEntry>>,
        client_key: &str,
        limit: u64,
        window: Duration,
    ) -> (bool, u64) {
        windows
            .entry(client_key.to_string())
            .or_default()
            .admit(limit, window)
    }

    /// Weighted two-bucket check. INCR current bucket and read the previous
    /// one in a single atomic pipeline, then weight the previous count by the
    /// unelapsed fraction of the window. The increment-and-read is one round
    /// trip, so two concurrent requests can never both observe the same stale
    /// count.
    async fn admit_redis(
        connection_manager: &Arc<redis::aio::ConnectionManager>,
        key_prefix: &str,
        client_key: &str,
        limit: u64,
        window: Duration,
        timeout: Duration,
    ) -> Result<(bool, u64), String> {
        let window_ms = window.as_millis().max(1) as u64;
        let now_ms = Utc::now().timestamp_millis() as u64;
        let bucket = now_ms / window_ms;
        let elapsed_frac = (now_ms % window_ms) as f64 / window_ms as f64;

        let current_key = format!("rate:{}:{}:{}", key_prefix, client_key, bucket);
        let previous_key = format!("rate:{}:{}:{}", key_prefix, client_key, bucket - 1);
        // Buckets must survive one full window after they stop being current.
        let ttl_secs = (window.as_secs().max(1)) * 2;

        let mut conn = connection_manager.as_ref().clone();
        let round_trip = async move {
            let (current, previous): (u64, Option<u64>) = redis::pipe()
                .atomic()
                .incr(&current_key, 1u64)
                .expire(&current_key, ttl_secs as i64)
                .ignore()
                .get(&previous_key)
                .query_async(&mut conn)
                .await?;
            Ok::<(u64, Option<u64>), redis::RedisError>((current, previous))
        };

        let (current, previous) = tokio::time::timeout(timeout, round_trip)
            .await
            .map_err(|_| "timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let weighted = previous.unwrap_or(0) as f64 * (1.0 - elapsed_frac) + current as f64;
        let count = weighted.ceil() as u64;
        Ok((count <= limit, count))
    }

    /// Drop idle in-memory entries so abandoned client keys do not accumulate.
    pub fn start_cleanup_task(&self, window: Duration, interval_secs: u64) {
        let windows = match self {
            Self::Memory { windows } => windows.clone(),
            Self::Redis { local_fallback, .. } => local_fallback.clone(),
        };
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                windows.retain(|_, entry| !entry.is_idle(window));
            }
        });
    }
}
