use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::config::AppSettings;
use crate::error::AppError;
use crate::handlers::auth::{csrf_cookie, TokenPairResponse};
use crate::middleware::{correlation_id_http, extract_client_ip_http};
use crate::security::CsrfGuard;
use crate::services::{AuditEvent, AuditEventType, AuditService, Severity, TokenService};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /auth/refresh
///
/// Rotates a refresh token: the old one is revoked and a new pair is minted
/// in the same family. Presenting an already-rotated token is treated as
/// theft and kills the whole family.
pub async fn refresh(
    req: HttpRequest,
    body: web::Json<RefreshRequest>,
    tokens: web::Data<TokenService>,
    csrf: web::Data<CsrfGuard>,
    audit: web::Data<AuditService>,
    settings: web::Data<AppSettings>,
) -> Result<HttpResponse, AppError> {
    let client_ip = extract_client_ip_http(&req, &settings.security.trusted_proxies);
    let request_id = correlation_id_http(&req);

    let (access_token, refresh_token, old_claims) = match tokens.refresh(&body.refresh_token).await
    {
        Ok(rotated) => rotated,
        Err(err) => {
            let event_type = if matches!(err, AppError::TokenReused) {
                AuditEventType::TokenReused
            } else {
                AuditEventType::AccessDenied
            };
            let severity = if matches!(err, AppError::TokenReused) {
                Severity::Critical
            } else {
                Severity::Warning
            };
            audit.record(
                AuditEvent::new(event_type)
                    .with_severity(severity)
                    .with_client_ip(client_ip)
                    .with_correlation_id(request_id)
                    .with_detail("operation", "token_refresh")
                    .with_detail("reason", err.to_string()),
            );
            return Err(err);
        }
    };

    // The session (family) is unchanged, but the CSRF cookie may be close to
    // its own expiry; re-issue it alongside the rotated pair.
    let csrf_token = csrf.issue(&old_claims.fam)?;

    audit.record(
        AuditEvent::new(AuditEventType::ApiRequest)
            .with_client_ip(client_ip)
            .with_correlation_id(request_id)
            .with_user_id(old_claims.sub.clone())
            .with_detail("operation", "token_refresh"),
    );

    Ok(HttpResponse::Ok()
        .cookie(csrf_cookie(csrf_token, settings.security.csrf_token_hours))
        .json(TokenPairResponse {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in_secs: settings.security.access_token_minutes * 60,
        }))
}
