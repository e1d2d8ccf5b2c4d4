use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use serde::Deserialize;

use crate::config::AppSettings;
use crate::error::AppError;
use crate::handlers::auth::{csrf_cookie, TokenPairResponse};
use crate::middleware::{correlation_id_http, extract_client_ip_http};
use crate::security::CsrfGuard;
use crate::services::{
    AuditEvent, AuditEventType, AuditService, Severity, TokenService, UserStore,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /auth/login
///
/// Verifies credentials, mints an access/refresh token pair and sets the
/// CSRF cookie bound to the new session. Failures are audited with the
/// username but never the password.
pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    users: web::Data<UserStore>,
    tokens: web::Data<TokenService>,
    csrf: web::Data<CsrfGuard>,
    audit: web::Data<AuditService>,
    settings: web::Data<AppSettings>,
) -> Result<HttpResponse, AppError> {
    let client_ip = extract_client_ip_http(&req, &settings.security.trusted_proxies);
    let request_id = correlation_id_http(&req);

    let user = match users.verify_credentials(&body.username, &body.password) {
        Ok(user) => user,
        Err(err) => {
            audit.record(
                AuditEvent::new(AuditEventType::LoginFailure)
                    .with_severity(Severity::Warning)
                    .with_client_ip(client_ip)
                    .with_correlation_id(request_id)
                    .with_detail("username", body.username.as_str()),
            );
            return Err(err);
        }
    };

    let (access_token, refresh_token, family) = tokens.issue_pair(&user)?;
    let csrf_token = csrf.issue(&family)?;

    info!("User '{}' logged in", user.username);
    audit.record(
        AuditEvent::new(AuditEventType::LoginSuccess)
            .with_client_ip(client_ip)
            .with_correlation_id(request_id)
            .with_user_id(user.id.to_string())
            .with_detail("username", user.username.as_str()),
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
