pub mod body_limit;
pub mod csrf_protection;
pub mod rate_limiting;
pub mod secure_auth;

pub use body_limit::BodySizeGuard;
pub use csrf_protection::CsrfProtection;
pub use rate_limiting::RateLimitMiddleware;
pub use secure_auth::{RoutePolicy, RouteRule, SecureAuthentication};

use actix_web::dev::ServiceRequest;
use actix_web::http::header::HeaderMap;
use actix_web::{HttpMessage, HttpRequest};
use std::net::IpAddr;
use uuid::Uuid;

/// Stable per-request id joining the audit events every pipeline stage emits
/// for one request. Minted by whichever stage touches the request first.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

pub fn correlation_id(req: &ServiceRequest) -> String {
    if let Some(existing) = req.extensions().get::<CorrelationId>() {
        return existing.0.clone();
    }
    let id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(CorrelationId(id.clone()));
    id
}

/// Handler-side accessor for the same id.
pub fn correlation_id_http(req: &HttpRequest) -> String {
    if let Some(existing) = req.extensions().get::<CorrelationId>() {
        return existing.0.clone();
    }
    let id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(CorrelationId(id.clone()));
    id
}

// Forwarding headers are only honored when the immediate peer is a configured
// trusted proxy; anything a client can set itself is otherwise ignored. The
// first IP in X-Forwarded-For is the original client.
fn client_ip_from(peer: Option<IpAddr>, headers: &HeaderMap, trusted: &[IpAddr]) -> String {
    if let Some(peer_ip) = peer {
        if trusted.contains(&peer_ip) {
            if let Some(forwarded_for) = headers.get("x-forwarded-for") {
                if let Ok(forwarded_str) = forwarded_for.to_str() {
                    if let Some(first_ip) = forwarded_str.split(',').next() {
                        let candidate = first_ip.trim();
                        if candidate.parse::<IpAddr>().is_ok() {
                            return candidate.to_string();
                        }
                    }
                }
            }
        }
        return peer_ip.to_string();
    }

    "unknown".to_string()
}

/// Client IP for rate-limit keys and audit events.
pub fn extract_client_ip(req: &ServiceRequest, trusted_proxies: &[IpAddr]) -> String {
    client_ip_from(
        req.peer_addr().map(|addr| addr.ip()),
        req.headers(),
        trusted_proxies,
    )
}

pub fn extract_client_ip_http(req: &HttpRequest, trusted_proxies: &[IpAddr]) -> String {
    client_ip_from(
        req.peer_addr().map(|addr| addr.ip()),
        req.headers(),
        trusted_proxies,
    )
}
