//! Stage 1 of the security pipeline: reject oversized bodies before any
//! parsing or crypto work happens. Cheapest check first; pure
//! resource-exhaustion defense.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use std::net::IpAddr;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::AppError;
use crate::middleware::{correlation_id, extract_client_ip};
use crate::services::{AuditEvent, AuditEventType, AuditService, Severity};

#[derive(Clone)]
pub struct BodySizeGuard {
    max_bytes: usize,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl BodySizeGuard {
    pub fn new(max_bytes: usize, audit: AuditService, trusted_proxies: Vec<IpAddr>) -> Self {
        Self {
            max_bytes,
            audit,
            trusted_proxies,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BodySizeGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = BodySizeGuardService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(BodySizeGuardService {
            service: Rc::new(service),
            max_bytes: self.max_bytes,
            audit: self.audit.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        })
    }
}

pub struct BodySizeGuardService<S> {
    service: Rc<S>,
    max_bytes: usize,
    audit: AuditService,
    trusted_proxies: Vec<IpAddr>,
}

impl<S, B> Service<ServiceRequest> for BodySizeGuardService<S>
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
        let max_bytes = self.max_bytes;
        let audit = self.audit.clone();
        let trusted_proxies = self.trusted_proxies.clone();

        Box::pin(async move {
            let declared = req
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());

            if let Some(length) = declared {
                if length > max_bytes {
                    let client_ip = extract_client_ip(&req, &trusted_proxies);
                    warn!(
                        "Rejecting {} byte body from {} (limit {})",
                        length, client_ip, max_bytes
                    );
                    audit.record(
                        AuditEvent::new(AuditEventType::PayloadTooLarge)
                            .with_severity(Severity::Warning)
                            .with_client_ip(client_ip)
                            .with_correlation_id(correlation_id(&req))
                            .with_detail("declared_bytes", length as u64)
                            .with_detail("limit_bytes", max_bytes as u64)
                            .with_detail("path", req.path()),
                    );
                    return Err(AppError::PayloadTooLarge(max_bytes).into());
                }
            }

            service.call(req).await
        })
    }
}
