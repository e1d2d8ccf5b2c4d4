//! End-to-end checks of the full middleware chain: body size guard, rate
//! limiting, CSRF verification, bearer authentication and role checks, with
//! audit events captured for every denial.

use actix_web::body::MessageBody;
use actix_web::cookie::Cookie;
use actix_web::dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gateway_server::config::{
    AppSettings, BootstrapConfig, RateLimitConfig, RedisConfig, SecurityConfig, ServerConfig,
};
use gateway_server::middleware::{
    BodySizeGuard, CsrfProtection, RateLimitMiddleware, RoutePolicy, SecureAuthentication,
};
use gateway_server::models::Role;
use gateway_server::routes::configure_routes;
use gateway_server::security::{CsrfGuard, CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
use gateway_server::services::{
    AuditEvent, AuditEventType, AuditService, Severity, TokenService, UserStore,
};
use gateway_server::stores::{RateLimitStorage, RevocationStore};

struct TestContext {
    settings: AppSettings,
    user_store: UserStore,
    token_service: Arc<TokenService>,
    csrf_guard: Arc<CsrfGuard>,
    audit: AuditService,
    captured: Arc<Mutex<Vec<AuditEvent>>>,
    rate_storage: RateLimitStorage,
    policy: Arc<RoutePolicy>,
}

impl TestContext {
    fn new(max_requests: u64) -> Self {
        let settings = AppSettings {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_origins: vec!["*".to_string()],
            },
            security: SecurityConfig {
                jwt_secret: "test-jwt-secret-0123456789-0123456789-01".to_string(),
                csrf_secret: "test-csrf-secret-0123456789-0123456789-0".to_string(),
                access_token_minutes: 60,
                refresh_token_days: 7,
                csrf_token_hours: 24,
                max_body_bytes: 2048,
                trusted_proxies: Vec::<IpAddr>::new(),
            },
            rate_limit: RateLimitConfig {
                max_requests,
                window_secs: 60,
                per_route: false,
                redis_key_prefix: "test".to_string(),
            },
            redis: RedisConfig {
                url: None,
                timeout_ms: 50,
            },
            bootstrap: BootstrapConfig {
                admin_username: "admin".to_string(),
                admin_password: "admin-password-1".to_string(),
            },
        };

        let (audit, captured) = AuditService::with_capture(256);
        let token_service = Arc::new(TokenService::new(
            &settings.security,
            RevocationStore::new_memory(),
        ));
        let csrf_guard = Arc::new(CsrfGuard::new(
            &settings.security.csrf_secret,
            settings.security.csrf_token_hours,
        ));

        let user_store = UserStore::new();
        user_store
            .create("admin", "admin-password-1", vec![Role::Admin])
            .unwrap();
        user_store
            .create("viewer", "viewer-password-1", vec![Role::ReadOnly])
            .unwrap();

        let policy = Arc::new(
            RoutePolicy::new()
                .allow_public("/health")
                .allow_public("/auth/login")
                .allow_public("/auth/refresh")
                .require("/users", vec![Role::Admin]),
        );

        Self {
            settings,
            user_store,
            token_service,
            csrf_guard,
            audit,
            captured,
            rate_storage: RateLimitStorage::new_memory(),
            policy,
        }
    }

    fn app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody<Error: std::fmt::Debug> + Unpin + use<>>,
            Error = actix_web::Error,
            InitError = (),
        > + use<>,
    > {
        let trusted = self.settings.security.trusted_proxies.clone();
        App::new()
            .app_data(
                web::JsonConfig::default().limit(self.settings.security.max_body_bytes),
            )
            .app_data(web::PayloadConfig::new(self.settings.security.max_body_bytes))
            .app_data(web::Data::new(self.settings.clone()))
            .app_data(web::Data::from(self.token_service.clone()))
            .app_data(web::Data::from(self.csrf_guard.clone()))
            .app_data(web::Data::new(self.user_store.clone()))
            .app_data(web::Data::new(self.audit.clone()))
            .wrap(SecureAuthentication::new(
                self.token_service.clone(),
                self.user_store.clone(),
                self.policy.clone(),
                self.audit.clone(),
                trusted.clone(),
            ))
            .wrap(CsrfProtection::new(
                self.csrf_guard.clone(),
                vec!["/auth/login".to_string(), "/auth/refresh".to_string()],
                self.audit.clone(),
                trusted.clone(),
            ))
            .wrap(RateLimitMiddleware::new(
                self.rate_storage.clone(),
                self.settings.rate_limit.clone(),
                self.audit.clone(),
                trusted.clone(),
            ))
            .wrap(BodySizeGuard::new(
                self.settings.security.max_body_bytes,
                self.audit.clone(),
                trusted,
            ))
            .configure(configure_routes)
    }
}

/// Harness shim: render service-level errors through `ResponseError` exactly
/// as the live HTTP dispatcher does, so middleware rejections surface as the
/// status/body the client would see instead of panicking `call_service`.
async fn call_service<S, B>(
    app: &S,
    req: actix_http::Request,
) -> ServiceResponse<actix_web::body::BoxBody>
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody + 'static,
{
    match test::try_call_service(app, req).await {
        Ok(resp) => resp.map_into_boxed_body(),
        Err(err) => ServiceResponse::new(
            test::TestRequest::default().to_http_request(),
            actix_web::HttpResponse::from_error(err),
        ),
    }
}

async fn login_as<S, B>(app: &S, username: &str, password: &str) -> (String, String, String)
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody + Unpin + 'static,
    B::Error: std::fmt::Debug,
{
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({ "username": username, "password": password }))
        .to_request();
    let resp = call_service(app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let csrf = resp
        .response()
        .cookies()
        .find(|c| c.name() == CSRF_COOKIE_NAME)
        .expect("login sets the csrf cookie")
        .value()
        .to_string();

    let body: Value = test::read_body_json(resp).await;
    (
        body["accessToken"].as_str().unwrap().to_string(),
        body["refreshToken"].as_str().unwrap().to_string(),
        csrf,
    )
}

#[actix_web::test]
async fn login_returns_token_pair_and_csrf_cookie() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;

    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({ "username": "admin", "password": "admin-password-1" }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let cookie = resp
        .response()
        .cookies()
        .find(|c| c.name() == CSRF_COOKIE_NAME)
        .expect("csrf cookie");
    // Double-submit requires script access to the cookie.
    assert_ne!(cookie.http_only(), Some(true));

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["tokenType"], "bearer");
    assert_eq!(body["expiresInSecs"], 3600);
    assert!(body["accessToken"].as_str().unwrap().len() > 20);
    assert!(body["refreshToken"].as_str().unwrap().len() > 20);
}

#[actix_web::test]
async fn failed_login_is_generic_and_audited_without_the_password() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;

    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({ "username": "admin", "password": "wrong-password-x" }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Authentication failed");

    let events = ctx.captured.lock().unwrap();
    let failure = events
        .iter()
        .find(|e| matches!(e.event_type, AuditEventType::LoginFailure))
        .expect("login failure audited");
    let serialized = serde_json::to_string(failure).unwrap();
    assert!(!serialized.contains("wrong-password-x"));
}

#[actix_web::test]
async fn bearer_token_gates_userinfo() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;

    // No credentials at all.
    let resp = call_service(&app, test::TestRequest::get().uri("/auth/me").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // GET is never CSRF-checked, so the bearer token alone is enough.
    let (access, _, _) = login_as(&app, "admin", "admin-password-1").await;
    let req = test::TestRequest::get()
        .uri("/auth/me")
        .insert_header(("Authorization", format!("Bearer {}", access)))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["username"], "admin");
    assert_eq!(body["roles"], json!(["admin"]));
}

#[actix_web::test]
async fn mutating_request_without_csrf_is_rejected_before_auth() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;
    let (access, _, _) = login_as(&app, "admin", "admin-password-1").await;

    let req = test::TestRequest::post()
        .uri("/users")
        .insert_header(("Authorization", format!("Bearer {}", access)))
        .set_json(json!({ "username": "new-user", "password": "pw-123456789", "roles": ["user"] }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "csrf_error");

    let events = ctx.captured.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::CsrfViolation)));
}

#[actix_web::test]
async fn csrf_header_must_match_the_cookie() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;
    let (access, _, csrf) = login_as(&app, "admin", "admin-password-1").await;

    let req = test::TestRequest::post()
        .uri("/users")
        .cookie(Cookie::new(CSRF_COOKIE_NAME, csrf))
        .insert_header((CSRF_HEADER_NAME, "a-different-value"))
        .insert_header(("Authorization", format!("Bearer {}", access)))
        .set_json(json!({ "username": "new-user", "password": "pw-123456789", "roles": ["user"] }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn csrf_cookie_from_another_session_is_rejected() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;

    // Two independent sessions for the same account. The double-submit pair
    // from the second is internally consistent, but it belongs to a
    // different token family than the first bearer token.
    let (first_access, _, _) = login_as(&app, "admin", "admin-password-1").await;
    let (_, _, second_csrf) = login_as(&app, "admin", "admin-password-1").await;

    let req = test::TestRequest::post()
        .uri("/users")
        .cookie(Cookie::new(CSRF_COOKIE_NAME, second_csrf.clone()))
        .insert_header((CSRF_HEADER_NAME, second_csrf))
        .insert_header(("Authorization", format!("Bearer {}", first_access)))
        .set_json(json!({ "username": "new-user", "password": "pw-123456789", "roles": ["user"] }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let events = ctx.captured.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::CsrfViolation)));
}

#[actix_web::test]
async fn admin_routes_enforce_the_admin_role() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;

    let (viewer_access, _, viewer_csrf) = login_as(&app, "viewer", "viewer-password-1").await;
    let req = test::TestRequest::post()
        .uri("/users")
        .cookie(Cookie::new(CSRF_COOKIE_NAME, viewer_csrf.clone()))
        .insert_header((CSRF_HEADER_NAME, viewer_csrf))
        .insert_header(("Authorization", format!("Bearer {}", viewer_access)))
        .set_json(json!({ "username": "new-user", "password": "pw-123456789", "roles": ["user"] }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "forbidden");

    let (admin_access, _, admin_csrf) = login_as(&app, "admin", "admin-password-1").await;
    let req = test::TestRequest::post()
        .uri("/users")
        .cookie(Cookie::new(CSRF_COOKIE_NAME, admin_csrf.clone()))
        .insert_header((CSRF_HEADER_NAME, admin_csrf))
        .insert_header(("Authorization", format!("Bearer {}", admin_access)))
        .set_json(json!({ "username": "new-user", "password": "pw-123456789", "roles": ["user"] }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["username"], "new-user");
    assert!(body.get("password_hash").is_none());

    let events = ctx.captured.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::AccessDenied)));
}

#[actix_web::test]
async fn logout_kills_the_session() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;
    let (access, _, csrf) = login_as(&app, "admin", "admin-password-1").await;

    let req = test::TestRequest::post()
        .uri("/auth/logout")
        .cookie(Cookie::new(CSRF_COOKIE_NAME, csrf.clone()))
        .insert_header((CSRF_HEADER_NAME, csrf))
        .insert_header(("Authorization", format!("Bearer {}", access)))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // The same access token no longer authenticates.
    let req = test::TestRequest::get()
        .uri("/auth/me")
        .insert_header(("Authorization", format!("Bearer {}", access)))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let events = ctx.captured.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::Logout)));
}

#[actix_web::test]
async fn refresh_rotates_and_replay_kills_the_family() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;
    let (_, refresh, _) = login_as(&app, "admin", "admin-password-1").await;

    let req = test::TestRequest::post()
        .uri("/auth/refresh")
        .set_json(json!({ "refreshToken": refresh }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let rotated = body["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh);

    // Replaying the already-rotated token is treated as theft.
    let req = test::TestRequest::post()
        .uri("/auth/refresh")
        .set_json(json!({ "refreshToken": refresh }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // The rotated descendant dies with the family.
    let req = test::TestRequest::post()
        .uri("/auth/refresh")
        .set_json(json!({ "refreshToken": rotated }))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let events = ctx.captured.lock().unwrap();
    let reuse = events
        .iter()
        .find(|e| matches!(e.event_type, AuditEventType::TokenReused))
        .expect("replay audited");
    assert!(matches!(reuse.severity, Severity::Critical));
}

#[actix_web::test]
async fn requests_over_the_limit_get_429() {
    let ctx = TestContext::new(3);
    let app = test::init_service(ctx.app()).await;

    for _ in 0..3 {
        let resp =
            call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp =
        call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let events = ctx.captured.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::RateLimitExceeded)));
}

#[actix_web::test]
async fn oversized_bodies_are_rejected_up_front() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;

    let req = test::TestRequest::post()
        .uri("/auth/login")
        .insert_header(("content-length", "1000000"))
        .to_request();
    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let events = ctx.captured.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::PayloadTooLarge)));
}

#[actix_web::test]
async fn oversized_body_without_content_length_is_rejected() {
    let ctx = TestContext::new(1000);
    let app = test::init_service(ctx.app()).await;

    // A streamed body declares no length up front, so the header guard never
    // sees it; the payload limit has to catch it while buffering.
    let huge = "x".repeat(4096);
    let mut req = test::TestRequest::post()
        .uri("/auth/login")
        .set_json(json!({ "username": "admin", "password": huge }))
        .to_request();
    req.headers_mut()
        .remove(actix_web::http::header::CONTENT_LENGTH);

    let resp = call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[actix_web::test]
async fn fallback_rate_limiting_stays_in_effect() {
    // Memory storage never reports fallback; this exercises the decision
    // shape the middleware relies on.
    let storage = RateLimitStorage::new_memory();
    let decision = storage.allow("ip:10.0.0.1", 2, Duration::from_secs(60)).await;
    assert!(decision.allowed);
    assert!(!decision.fallback);
}
