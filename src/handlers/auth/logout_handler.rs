use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use log::info;

use crate::config::AppSettings;
use crate::error::AppError;
use crate::handlers::auth::csrf_removal_cookie;
use crate::middleware::{correlation_id_http, extract_client_ip_http};
use crate::models::Claims;
use crate::services::{AuditEvent, AuditEventType, AuditService, TokenService};

/// POST /auth/logout
///
/// Revokes the presented access token and its whole family, which covers the
/// paired refresh token without the client having to send it. Requires a
/// valid bearer token; the authentication stage already verified it.
pub async fn logout(
    req: HttpRequest,
    tokens: web::Data<TokenService>,
    audit: web::Data<AuditService>,
    settings: web::Data<AppSettings>,
) -> Result<HttpResponse, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| AppError::TokenMalformed("missing bearer token".to_string()))?;

    tokens.revoke_session(&claims).await?;

    info!("User '{}' logged out", claims.username);
    audit.record(
        AuditEvent::new(AuditEventType::Logout)
            .with_client_ip(extract_client_ip_http(
                &req,
                &settings.security.trusted_proxies,
            ))
            .with_correlation_id(correlation_id_http(&req))
            .with_user_id(claims.sub.clone())
            .with_detail("username", claims.username.as_str()),
    );

    Ok(HttpResponse::NoContent()
        .cookie(csrf_removal_cookie())
        .finish())
}
