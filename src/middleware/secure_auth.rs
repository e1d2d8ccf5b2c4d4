//! Stage 4 of the security pipeline: bearer-token authentication and
//! role-based authorization, followed by the audit record for the request.
//!
//! Every token failure collapses to the same generic 401 at the HTTP layer;
//! the audit event keeps the specific reason. Authorization failures are 403
//! and may name the missing role, since the caller already proved identity.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::debug;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::AppError;
use crate::middleware::{correlation_id, extract_client_ip};
use crate::models::{AuthenticatedUser, Role, TokenType};
use crate::security::CSRF_COOKIE_NAME;
use crate::services::{AuditEvent, AuditEventType, AuditService, Severity, TokenService, UserStore};

/// One authorization rule: requests whose path starts with `prefix` (and
/// match `methods`, when set) need one of `required_roles`. An empty role
/// list means any authenticated user.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub prefix: String,
    pub methods: Option<Vec<Method>>,
    pub required_roles: Vec<Role>,
}

/// Declarative per-route access policy. First matching rule wins; paths under
/// a public prefix skip authentication entirely.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    public_prefixes: Vec<String>,
    rules: Vec<RouteRule>,
}

impl RoutePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_public(mut self, prefix: &str) -> Self {
        self.public_prefixes.push(prefix.to_string());
        self
    }

    pub fn require(mut self, prefix: &str, roles: Vec<Role>) -> Self {
        self.rules.push(RouteRule {
            prefix: prefix.to_string(),
            methods: None,
            required_roles: roles,
        });
        self
    }

    pub fn require_for_methods(
        mut self,
        prefix: &str,
        methods: Vec<Method>,
        roles: Vec<Role>,
    ) -> Self {
        self.rules.push(RouteRule {
            prefix: prefix.to_string(),
            methods: Some(methods),
            required_roles: roles,
        });
        self
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Roles required for this path/method. Empty means authentication alone
    /// is enough.
    pub fn required_roles(&self, path: &str, method: &Method) -> Vec<Role> {
        for rule in &self.rules {
            if !path.starts_with(rule.prefix.as_str()) {
                continue;
            }
            if let Some(methods) = &rule.methods {
                if !methods.contains(method) {
                    continue;
                }
            }
            return rule.required_roles.clone();
        }
        Vec::new()
    }
}

#[derive(Clone)]
pub struct SecureAuthentication {
    token_service: Arc<TokenService>,
    user_store: UserStore,
    policy: Arc<RoutePolicy>,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl SecureAuthentication {
    pub fn new(
        token_service: Arc<TokenService>,
        user_store: UserStore,
        policy: Arc<RoutePolicy>,
        audit: AuditService,
        trusted_proxies: Vec<IpAddr>,
    ) -> Self {
        Self {
            token_service,
            user_store,
            policy,
            audit,
            trusted_proxies,
        }
    }
}

fn extract_bearer(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl<S, B> Transform<S, ServiceRequest> for SecureAuthentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SecureAuthenticationService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(SecureAuthenticationService {
            service: Rc::new(service),
            token_service: self.token_service.clone(),
            user_store: self.user_store.clone(),
            policy: self.policy.clone(),
            audit: self.audit.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        })
    }
}

pub struct SecureAuthenticationService<S> {
    service: Rc<S>,
    token_service: Arc<TokenService>,
    user_store: UserStore,
    policy: Arc<RoutePolicy>,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl<S, B> Service<ServiceRequest> for SecureAuthenticationService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let token_service = self.token_service.clone();
        let user_store = self.user_store.clone();
        let policy = self.policy.clone();
        let audit = self.audit.clone();
        let trusted_proxies = self.trusted_proxies.clone();

        Box::pin(async move {
            if req.method() == Method::OPTIONS || policy.is_public(req.path()) {
                return service.call(req).await;
            }

            let client_ip = extract_client_ip(&req, &trusted_proxies);
            let request_id = correlation_id(&req);

            let denied = |reason: String, user_id: Option<String>| {
                AuditEvent::new(AuditEventType::AccessDenied)
                    .with_severity(Severity::Warning)
                    .with_client_ip(client_ip.clone())
                    .with_correlation_id(request_id.clone())
                    .with_detail("path", req.path())
                    .with_detail("method", req.method().as_str())
                    .with_detail("reason", reason)
                    .apply_user_id(user_id)
            };

            let token = match extract_bearer(&req) {
                Some(token) => token,
                None => {
                    audit.record(denied("missing bearer token".to_string(), None));
                    return Err(
                        AppError::TokenMalformed("missing bearer token".to_string()).into()
                    );
                }
            };

            let claims = match token_service.verify(&token, TokenType::Access).await {
                Ok(claims) => claims,
                Err(err) => {
                    audit.record(denied(err.to_string(), None));
                    return Err(err.into());
                }
            };

            // Tokens outlive account changes; re-check the record so a
            // disabled account stops working before its tokens expire.
            match claims.sub.parse().ok().and_then(|id| user_store.get(&id).ok()) {
                Some(user) if user.active => {}
                _ => {
                    audit.record(denied(
                        "account disabled or missing".to_string(),
                        Some(claims.sub.clone()),
                    ));
                    return Err(AppError::TokenRevoked.into());
                }
            }

            // The CSRF stage proved the cookie is ours and matches the
            // header; tie it to this caller's session as well, so a cookie
            // planted from a different session cannot be replayed against a
            // stolen bearer token. The session id is the leading segment of
            // the signed cookie value.
            if matches!(
                *req.method(),
                Method::POST | Method::PUT | Method::PATCH | Method::DELETE
            ) {
                if let Some(cookie) = req.cookie(CSRF_COOKIE_NAME) {
                    let cookie_session = cookie.value().split('.').next().unwrap_or_default();
                    if cookie_session != claims.fam {
                        audit.record(
                            AuditEvent::new(AuditEventType::CsrfViolation)
                                .with_severity(Severity::Warning)
                                .with_client_ip(client_ip.clone())
                                .with_correlation_id(request_id.clone())
                                .with_user_id(claims.sub.clone())
                                .with_detail("path", req.path())
                                .with_detail("reason", "csrf token bound to another session"),
                        );
                        return Err(AppError::CsrfMismatch(
                            "token bound to another session".to_string(),
                        )
                        .into());
                    }
                }
            }

            let required = policy.required_roles(req.path(), req.method());
            if !required.is_empty() && !claims.roles.iter().any(|r| required.contains(r)) {
                let needed = required
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(" or ");
                audit.record(denied(
                    format!("requires role {}", needed),
                    Some(claims.sub.clone()),
                ));
                return Err(AppError::RoleDenied(format!("requires role {}", needed)).into());
            }

            debug!(
                "Authenticated {} for {} {}",
                claims.username,
                req.method(),
                req.path()
            );
            audit.record(
                AuditEvent::new(AuditEventType::ApiRequest)
                    .with_client_ip(client_ip)
                    .with_correlation_id(request_id)
                    .with_user_id(claims.sub.clone())
                    .with_detail("path", req.path())
                    .with_detail("method", req.method().as_str()),
            );

            req.extensions_mut().insert(AuthenticatedUser {
                user_id: claims
                    .sub
                    .parse()
                    .map_err(|_| AppError::TokenMalformed("invalid subject".to_string()))?,
                username: claims.username.clone(),
                roles: claims.roles.clone(),
                token_id: claims.jti.clone(),
                token_family: claims.fam.clone(),
            });
            req.extensions_mut().insert(claims);

            service.call(req).await
        })
    }
}
