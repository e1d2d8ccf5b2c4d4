use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use gateway_server::config::AppSettings;
use gateway_server::middleware::{
    BodySizeGuard, CsrfProtection, RateLimitMiddleware, RoutePolicy, SecureAuthentication,
};
use gateway_server::models::Role;
use gateway_server::routes::configure_routes;
use gateway_server::security::CsrfGuard;
use gateway_server::services::{AuditService, TokenService, UserStore};
use gateway_server::stores::{RateLimitStorage, RevocationStore};

const CLEANUP_INTERVAL_SECS: u64 = 300;
const AUDIT_CHANNEL_CAPACITY: usize = 4096;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = AppSettings::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    let redis_timeout = Duration::from_millis(settings.redis.timeout_ms);

    // Shared stores: redis when configured, otherwise in-process (single
    // instance). Rate limiting falls open to local counting if redis becomes
    // unreachable; revocation checks fail closed.
    let (revocation, rate_storage) = match settings.redis.url.as_deref() {
        Some(url) => {
            let revocation = RevocationStore::new_redis(
                url,
                &settings.rate_limit.redis_key_prefix,
                redis_timeout,
            )
            .await
            .unwrap_or_else(|e| {
                eprintln!("Redis unavailable at startup: {}", e);
                std::process::exit(1);
            });
            let rate_storage = RateLimitStorage::new_redis(
                url,
                &settings.rate_limit.redis_key_prefix,
                redis_timeout,
            )
            .await
            .unwrap_or_else(|e| {
                eprintln!("Redis unavailable at startup: {}", e);
                std::process::exit(1);
            });
            (revocation, rate_storage)
        }
        None => {
            warn!("REDIS_URL not set; using in-process stores (single instance only)");
            (RevocationStore::new_memory(), RateLimitStorage::new_memory())
        }
    };
    revocation.start_cleanup_task(CLEANUP_INTERVAL_SECS);
    rate_storage.start_cleanup_task(
        Duration::from_secs(settings.rate_limit.window_secs),
        CLEANUP_INTERVAL_SECS,
    );

    let audit = AuditService::new(AUDIT_CHANNEL_CAPACITY);
    let token_service = Arc::new(TokenService::new(&settings.security, revocation));
    let csrf_guard = Arc::new(CsrfGuard::new(
        &settings.security.csrf_secret,
        settings.security.csrf_token_hours,
    ));
    let user_store = UserStore::new();

    user_store
        .ensure_admin(
            &settings.bootstrap.admin_username,
            &settings.bootstrap.admin_password,
        )
        .unwrap_or_else(|e| {
            eprintln!("Failed to provision bootstrap admin: {}", e);
            std::process::exit(1);
        });

    let policy = Arc::new(
        RoutePolicy::new()
            .allow_public("/health")
            .allow_public("/auth/login")
            .allow_public("/auth/refresh")
            .require("/users", vec![Role::Admin]),
    );
    // Login has no session to bind a CSRF token to yet; refresh is protected
    // by possession of the refresh token itself.
    let csrf_exempt = vec!["/auth/login".to_string(), "/auth/refresh".to_string()];

    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Starting gateway on {}", bind_addr);

    let settings_data = web::Data::new(settings.clone());

    HttpServer::new(move || {
        let cors = if settings.server.cors_origins.iter().any(|o| o == "*") {
            Cors::default()
                .allow_any_origin()
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec!["Authorization", "Content-Type", "X-CSRF-Token"])
                .max_age(3600)
        } else {
            let mut cors = Cors::default()
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec!["Authorization", "Content-Type", "X-CSRF-Token"])
                .supports_credentials()
                .max_age(3600);
            for origin in &settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        // wrap() nests: the last wrap registered runs first, so execution
        // order is Logger, cors, size guard, rate limit, CSRF, auth.
        App::new()
            // The header guard rejects declared oversizes before any work;
            // these enforce the same ceiling on chunked bodies that carry no
            // Content-Length.
            .app_data(web::JsonConfig::default().limit(settings.security.max_body_bytes))
            .app_data(web::PayloadConfig::new(settings.security.max_body_bytes))
            .app_data(settings_data.clone())
            .app_data(web::Data::from(token_service.clone()))
            .app_data(web::Data::from(csrf_guard.clone()))
            .app_data(web::Data::new(user_store.clone()))
            .app_data(web::Data::new(audit.clone()))
            .wrap(SecureAuthentication::new(
                token_service.clone(),
                user_store.clone(),
                policy.clone(),
                audit.clone(),
                settings.security.trusted_proxies.clone(),
            ))
            .wrap(CsrfProtection::new(
                csrf_guard.clone(),
                csrf_exempt.clone(),
                audit.clone(),
                settings.security.trusted_proxies.clone(),
            ))
            .wrap(RateLimitMiddleware::new(
                rate_storage.clone(),
                settings.rate_limit.clone(),
                audit.clone(),
                settings.security.trusted_proxies.clone(),
            ))
            .wrap(BodySizeGuard::new(
                settings.security.max_body_bytes,
                audit.clone(),
                settings.security.trusted_proxies.clone(),
            ))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_routes)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
