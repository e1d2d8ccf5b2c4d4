//! Token revocation entries.
//!
//! An entry exists only for tokens revoked before natural expiry, keyed by
//! jti or by token family. Every entry's TTL equals the token's own expiry,
//! so the store self-prunes: anything older would fail expiry validation
//! anyway. The redis backend is the shared source of truth across gateway
//! instances; lookups carry a short timeout and the caller fails closed when
//! it elapses.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub enum RevocationStore {
    /// In-process entries (single instance), value = expiry unix seconds.
    Memory { entries: Arc<DashMap<String, i64>> },
    /// Shared entries in redis with per-key TTL.
    Redis {
        connection_manager: Arc<redis::aio::ConnectionManager>,
        key_prefix: String,
        timeout: Duration,
    },
}

fn jti_key(prefix: &str, jti: &str) -> String {
    format!("revoked:{}:jti:{}", prefix, jti)
}

fn family_key(prefix: &str, family: &str) -> String {
    format!("revoked:{}:fam:{}", prefix, family)
}

impl RevocationStore {
    pub fn new_memory() -> Self {
        Self::Memory {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub async fn new_redis(
        redis_url: &str,
        key_prefix: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Configuration(format!("Invalid redis URL: {}", e)))?;
        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("redis connect: {}", e)))?;

        info!("Redis connection established for token revocation");

        Ok(Self::Redis {
            connection_manager: Arc::new(connection_manager),
            key_prefix: key_prefix.to_string(),
            timeout,
        })
    }

    /// Revoke a single token id until its natural expiry.
    pub async fn revoke_jti(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        self.insert("jti", jti, expires_at).await
    }

    /// Revoke every token minted in a family (access + refresh pair and all
    /// rotations). Used on logout and on detected refresh-token replay.
    pub async fn revoke_family(
        &self,
        family: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.insert("fam", family, expires_at).await
    }

    async fn insert(
        &self,
        kind: &str,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let ttl_secs = (expires_at - Utc::now()).num_seconds();
        if ttl_secs <= 0 {
            // Already past expiry; normal validation rejects it without us.
            debug!("Skipping revocation of already-expired {} {}", kind, id);
            return Ok(());
        }

        match self {
            Self::Memory { entries } => {
                let key = format!("{}:{}", kind, id);
                let expiry = expires_at.timestamp();
                entries
                    .entry(key)
                    .and_modify(|e| *e = (*e).max(expiry))
                    .or_insert(expiry);
                Ok(())
            }
            Self::Redis {
                connection_manager,
                key_prefix,
                timeout,
            } => {
                use redis::AsyncCommands;

                let key = match kind {
                    "fam" => family_key(key_prefix, id),
                    _ => jti_key(key_prefix, id),
                };
                let mut conn = connection_manager.as_ref().clone();
                let write = async move {
                    let _: () = conn.set_ex(&key, 1u8, ttl_secs as u64).await?;
                    Ok::<(), redis::RedisError>(())
                };

                match tokio::time::timeout(*timeout, write).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(AppError::StoreUnavailable(format!(
                        "revocation write: {}",
                        e
                    ))),
                    Err(_) => Err(AppError::StoreUnavailable(
                        "revocation write timed out".to_string(),
                    )),
                }
            }
        }
    }

    /// Whether a token with this jti/family is revoked.
    ///
    /// Returns `StoreUnavailable` when the shared store cannot answer in time;
    /// the token service treats that as revoked (fail closed) rather than
    /// trusting a token it cannot check.
    pub async fn is_revoked(&self, jti: &str, family: &str) -> Result<bool, AppError> {
        match self {
            Self::Memory { entries } => {
                let now = Utc::now().timestamp();
                let live = |key: String| {
                    entries
                        .get(&key)
                        .map(|expiry| *expiry > now)
                        .unwrap_or(false)
                };
                Ok(live(format!("jti:{}", jti)) || live(format!("fam:{}", family)))
            }
            Self::Redis {
                connection_manager,
                key_prefix,
                timeout,
            } => {
                use redis::AsyncCommands;

                let keys = vec![jti_key(key_prefix, jti), family_key(key_prefix, family)];
                let mut conn = connection_manager.as_ref().clone();
                let lookup = async move {
                    let hits: i64 = conn.exists(&keys).await?;
                    Ok::<i64, redis::RedisError>(hits)
                };

                match tokio::time::timeout(*timeout, lookup).await {
                    Ok(Ok(hits)) => Ok(hits > 0),
                    Ok(Err(e)) => {
                        warn!("Revocation lookup failed: {}", e);
                        Err(AppError::StoreUnavailable(format!(
                            "revocation lookup: {}",
                            e
                        )))
                    }
                    Err(_) => {
                        warn!("Revocation lookup timed out");
                        Err(AppError::StoreUnavailable(
                            "revocation lookup timed out".to_string(),
                        ))
                    }
                }
            }
        }
    }

    /// Whether this specific jti has a live revocation entry. Used by the
    /// refresh path to tell an already-rotated token (replay) apart from a
    /// family-wide revocation (ordinary logout).
    pub async fn is_jti_revoked(&self, jti: &str) -> Result<bool, AppError> {
        self.lookup_one(&format!("jti:{}", jti), |prefix| jti_key(prefix, jti))
            .await
    }

    /// Whether the whole family is revoked.
    pub async fn is_family_revoked(&self, family: &str) -> Result<bool, AppError> {
        self.lookup_one(&format!("fam:{}", family), |prefix| {
            family_key(prefix, family)
        })
        .await
    }

    async fn lookup_one(
        &self,
        memory_key: &str,
        redis_key: impl Fn(&str) -> String,
    ) -> Result<bool, AppError> {
        match self {
            Self::Memory { entries } => {
                let now = Utc::now().timestamp();
                Ok(entries
                    .get(memory_key)
                    .map(|expiry| *expiry > now)
                    .unwrap_or(false))
            }
            Self::Redis {
                connection_manager,
                key_prefix,
                timeout,
            } => {
                use redis::AsyncCommands;

                let key = redis_key(key_prefix);
                let mut conn = connection_manager.as_ref().clone();
                let lookup = async move {
                    let hit: bool = conn.exists(&key).await?;
                    Ok::<bool, redis::RedisError>(hit)
                };

                match tokio::time::timeout(*timeout, lookup).await {
                    Ok(Ok(hit)) => Ok(hit),
                    Ok(Err(e)) => Err(AppError::StoreUnavailable(format!(
                        "revocation lookup: {}",
                        e
                    ))),
                    Err(_) => Err(AppError::StoreUnavailable(
                        "revocation lookup timed out".to_string(),
                    )),
                }
            }
        }
    }

    /// Periodically drop expired in-memory entries. Redis prunes itself via
    /// per-key TTLs, so this is a no-op there. Correctness never depends on
    /// this task; expired entries are already ignored on lookup.
    pub fn start_cleanup_task(&self, interval_secs: u64) {
        if let Self::Memory { entries } = self {
            let entries = entries.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(interval_secs));
                loop {
                    interval.tick().await;
                    let now = Utc::now().timestamp();
                    entries.retain(|_, expiry| *expiry > now);
                }
            });
        }
    }
}
