//! Stage 3 of the security pipeline: double-submit CSRF verification for
//! state-changing requests.
//!
//! Safe methods (GET, HEAD, OPTIONS) pass untouched. Mutating requests must
//! present the signed csrf cookie and echo the same value in the
//! `X-CSRF-Token` header, which cross-origin script cannot do. Exempt path
//! prefixes cover endpoints that cannot have a token yet (login) or are
//! protected by the bearer token alone.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::middleware::{correlation_id, extract_client_ip};
use crate::security::{CsrfGuard, CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
use crate::services::{AuditEvent, AuditEventType, AuditService, Severity};

#[derive(Clone)]
pub struct CsrfProtection {
    guard: Arc<CsrfGuard>,
    exempt_prefixes: Vec<String>,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl CsrfProtection {
    pub fn new(
        guard: Arc<CsrfGuard>,
        exempt_prefixes: Vec<String>,
        audit: AuditService,
        trusted_proxies: Vec<IpAddr>,
    ) -> Self {
        Self {
            guard,
            exempt_prefixes,
            audit,
            trusted_proxies,
        }
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

impl<S, B> Transform<S, ServiceRequest> for CsrfProtection
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = CsrfProtectionService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CsrfProtectionService {
            service: Rc::new(service),
            guard: self.guard.clone(),
            exempt_prefixes: self.exempt_prefixes.clone(),
            audit: self.audit.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        })
    }
}

pub struct CsrfProtectionService<S> {
    service: Rc<S>,
    guard: Arc<CsrfGuard>,
    exempt_prefixes: Vec<String>,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl<S, B> Service<ServiceRequest> for CsrfProtectionService<S>
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
        let guard = self.guard.clone();
        let exempt_prefixes = self.exempt_prefixes.clone();
        let audit = self.audit.clone();
        let trusted_proxies = self.trusted_proxies.clone();

        Box::pin(async move {
            if !is_mutating(req.method()) {
                return service.call(req).await;
            }
            if exempt_prefixes
                .iter()
                .any(|prefix| req.path().starts_with(prefix.as_str()))
            {
                return service.call(req).await;
            }

            let cookie_value = req.cookie(CSRF_COOKIE_NAME).map(|c| c.value().to_string());
            let header_value = req
                .headers()
                .get(CSRF_HEADER_NAME)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());

            if let Err(err) = guard.verify_pair(
                cookie_value.as_deref().unwrap_or(""),
                header_value.as_deref().unwrap_or(""),
            ) {
                audit.record(
                    AuditEvent::new(AuditEventType::CsrfViolation)
                        .with_severity(Severity::Warning)
                        .with_client_ip(extract_client_ip(&req, &trusted_proxies))
                        .with_correlation_id(correlation_id(&req))
                        .with_detail("path", req.path())
                        .with_detail("method", req.method().as_str())
                        .with_detail("reason", err.to_string()),
                );
                return Err(err.into());
            }

            service.call(req).await
        })
    }
}
