use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::IpAddr;

/// Default maximum request body size: 10 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub redis: RedisConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// All secrets and lifetimes consumed by the security components. Constructed
/// once from the environment and injected into each component; there is no
/// process-global key state, so tests can run isolated instances with
/// different secrets side by side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub csrf_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub csrf_token_hours: i64,
    pub max_body_bytes: usize,
    /// Peers allowed to set X-Forwarded-For. Forwarding headers from anyone
    /// else are ignored and the direct peer address is used instead.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_secs: u64,
    /// When true the client key is IP + route instead of IP alone.
    pub per_route: bool,
    pub redis_key_prefix: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Unset means in-process stores only (single-instance deployment).
    pub url: Option<String>,
    /// Time allowed for each shared-store round trip before the fallback policy
    /// kicks in (fail open to local counting for rate limits, fail closed for
    /// revocation checks).
    pub timeout_ms: u64,
}

/// Initial admin account provisioned at startup when the user store is empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_password: String,
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        // Server config
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| {
                AppError::Configuration("SERVER_PORT must be a valid port number".to_string())
            })?;

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        // Security config
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Configuration("JWT_SECRET must be set".to_string()))?;
        if jwt_secret.len() < 32 {
            return Err(AppError::Configuration(
                "JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }

        let csrf_secret = env::var("CSRF_SECRET")
            .map_err(|_| AppError::Configuration("CSRF_SECRET must be set".to_string()))?;
        if csrf_secret.len() < 32 {
            return Err(AppError::Configuration(
                "CSRF_SECRET must be at least 32 bytes".to_string(),
            ));
        }

        let access_token_minutes = env::var("ACCESS_TOKEN_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<i64>()
            .map_err(|_| {
                AppError::Configuration("ACCESS_TOKEN_MINUTES must be a valid number".to_string())
            })?;

        let refresh_token_days = env::var("REFRESH_TOKEN_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse::<i64>()
            .map_err(|_| {
                AppError::Configuration("REFRESH_TOKEN_DAYS must be a valid number".to_string())
            })?;

        // Access tokens must never outlive the refresh tokens that renew them.
        if access_token_minutes > refresh_token_days * 24 * 60 {
            return Err(AppError::Configuration(
                "ACCESS_TOKEN_MINUTES must not exceed the refresh token lifetime".to_string(),
            ));
        }

        let csrf_token_hours = env::var("CSRF_TOKEN_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse::<i64>()
            .map_err(|_| {
                AppError::Configuration("CSRF_TOKEN_HOURS must be a valid number".to_string())
            })?;

        let max_body_bytes = env::var("MAX_BODY_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_BODY_BYTES.to_string())
            .parse::<usize>()
            .map_err(|_| {
                AppError::Configuration("MAX_BODY_BYTES must be a valid number".to_string())
            })?;

        let trusted_proxies = env::var("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim().parse::<IpAddr>().map_err(|_| {
                    AppError::Configuration(format!("TRUSTED_PROXIES entry '{}' is not an IP", s))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Rate limiting
        let rate_limit_max_requests = env::var("RATE_LIMIT_MAX_REQUESTS")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration("RATE_LIMIT_MAX_REQUESTS must be a valid number".to_string())
            })?;

        let rate_limit_window_secs = env::var("RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration("RATE_LIMIT_WINDOW_SECS must be a valid number".to_string())
            })?;

        let rate_limit_per_route = env::var("RATE_LIMIT_PER_ROUTE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let redis_key_prefix =
            env::var("RATE_LIMIT_KEY_PREFIX").unwrap_or_else(|_| "gateway".to_string());

        // Redis
        let redis_url = env::var("REDIS_URL").ok();
        let redis_timeout_ms = env::var("REDIS_TIMEOUT_MS")
            .unwrap_or_else(|_| "50".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration("REDIS_TIMEOUT_MS must be a valid number".to_string())
            })?;

        // Bootstrap admin
        let admin_username = env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
        let admin_password = env::var("ADMIN_PASSWORD")
            .map_err(|_| AppError::Configuration("ADMIN_PASSWORD must be set".to_string()))?;

        Ok(Self {
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
            },
            security: SecurityConfig {
                jwt_secret,
                csrf_secret,
                access_token_minutes,
                refresh_token_days,
                csrf_token_hours,
                max_body_bytes,
                trusted_proxies,
            },
            rate_limit: RateLimitConfig {
                max_requests: rate_limit_max_requests,
                window_secs: rate_limit_window_secs,
                per_route: rate_limit_per_route,
                redis_key_prefix,
            },
            redis: RedisConfig {
                url: redis_url,
                timeout_ms: redis_timeout_ms,
            },
            bootstrap: BootstrapConfig {
                admin_username,
                admin_password,
            },
        })
    }
}
