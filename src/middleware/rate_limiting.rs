//! Stage 2 of the security pipeline: sliding-window rate limiting keyed by
//! client IP (optionally per route). Runs before any crypto so a flood never
//! buys Argon2 or signature work.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use std::net::IpAddr;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::middleware::{correlation_id, extract_client_ip};
use crate::services::{AuditEvent, AuditEventType, AuditService, Severity};
use crate::stores::RateLimitStorage;

#[derive(Clone)]
pub struct RateLimitMiddleware {
    storage: RateLimitStorage,
    config: RateLimitConfig,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl RateLimitMiddleware {
    pub fn new(
        storage: RateLimitStorage,
        config: RateLimitConfig,
        audit: AuditService,
        trusted_proxies: Vec<IpAddr>,
    ) -> Self {
        Self {
            storage,
            config,
            audit,
            trusted_proxies,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitService {
            service: Rc::new(service),
            storage: self.storage.clone(),
            config: self.config.clone(),
            audit: self.audit.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        })
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    storage: RateLimitStorage,
    config: RateLimitConfig,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
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
        let storage = self.storage.clone();
        let config = self.config.clone();
        let audit = self.audit.clone();
        let trusted_proxies = self.trusted_proxies.clone();

        Box::pin(async move {
            // CORS preflights carry no credentials and browsers do not retry
            // them under client control; limiting them only breaks CORS.
            if req.method() == Method::OPTIONS {
                return service.call(req).await;
            }

            let client_ip = extract_client_ip(&req, &trusted_proxies);
            let key = if config.per_route {
                format!("{}:{}", client_ip, req.path())
            } else {
                client_ip.clone()
            };

            let decision = storage
                .allow(
                    &key,
                    config.max_requests,
                    Duration::from_secs(config.window_secs),
                )
                .await;

            if decision.fallback {
                audit.record(
                    AuditEvent::new(AuditEventType::StoreFallback)
                        .with_severity(Severity::Warning)
                        .with_client_ip(client_ip.clone())
                        .with_correlation_id(correlation_id(&req))
                        .with_detail("store", "rate_limit")
                        .with_detail("mode", "local_counting"),
                );
            }

            if !decision.allowed {
                warn!(
                    "Rate limit exceeded for {} ({}/{} in {}s)",
                    key, decision.count, decision.limit, config.window_secs
                );
                audit.record(
                    AuditEvent::new(AuditEventType::RateLimitExceeded)
                        .with_severity(Severity::Warning)
                        .with_client_ip(client_ip)
                        .with_correlation_id(correlation_id(&req))
                        .with_detail("path", req.path())
                        .with_detail("count", decision.count)
                        .with_detail("limit", decision.limit),
                );
                return Err(AppError::RateLimitExceeded(format!(
                    "limit of {} requests per {}s exceeded",
                    decision.limit, config.window_secs
                ))
                .into());
            }

            service.call(req).await
        })
    }
}
