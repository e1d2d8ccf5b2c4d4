//! Account administration endpoints. The route policy restricts all of them
//! to the ADMIN role before these handlers run.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use log::info;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::correlation_id_http;
use crate::models::{AuthenticatedUser, Role};
use crate::services::{AuditEvent, AuditEventType, AuditService, UserStore};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub roles: Vec<Role>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRolesRequest {
    pub roles: Vec<Role>,
}

fn acting_admin(req: &HttpRequest) -> Option<String> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .map(|identity| identity.user_id.to_string())
}

/// POST /users
pub async fn create_user(
    req: HttpRequest,
    body: web::Json<CreateUserRequest>,
    users: web::Data<UserStore>,
    audit: web::Data<AuditService>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let user = users.create(&body.username, &body.password, body.roles)?;

    info!("Provisioned account '{}'", user.username);
    audit.record(
        AuditEvent::new(AuditEventType::ApiRequest)
            .with_correlation_id(correlation_id_http(&req))
            .apply_user_id(acting_admin(&req))
            .with_detail("operation", "create_user")
            .with_detail("created_user_id", user.id.to_string()),
    );

    // User serializes without its password hash.
    Ok(HttpResponse::Created().json(user))
}

/// PUT /users/{id}/password
pub async fn change_password(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<ChangePasswordRequest>,
    users: web::Data<UserStore>,
    audit: web::Data<AuditService>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    users.set_password(&user_id, &body.password)?;

    audit.record(
        AuditEvent::new(AuditEventType::ApiRequest)
            .with_correlation_id(correlation_id_http(&req))
            .apply_user_id(acting_admin(&req))
            .with_detail("operation", "change_password")
            .with_detail("target_user_id", user_id.to_string()),
    );

    Ok(HttpResponse::NoContent().finish())
}

/// PUT /users/{id}/roles
pub async fn assign_roles(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<AssignRolesRequest>,
    users: web::Data<UserStore>,
    audit: web::Data<AuditService>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let roles = body.into_inner().roles;
    users.set_roles(&user_id, roles.clone())?;

    audit.record(
        AuditEvent::new(AuditEventType::ApiRequest)
            .with_correlation_id(correlation_id_http(&req))
            .apply_user_id(acting_admin(&req))
            .with_detail("operation", "assign_roles")
            .with_detail("target_user_id", user_id.to_string())
            .with_detail(
                "roles",
                roles.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            ),
    );

    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /users/{id}
///
/// Soft-disable: the record stays for audit referential integrity, logins
/// stop immediately, and outstanding tokens die at the next authentication
/// check.
pub async fn deactivate_user(
    req: HttpRequest,
    path: web::Path<Uuid>,
    users: web::Data<UserStore>,
    audit: web::Data<AuditService>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    users.deactivate(&user_id)?;

    audit.record(
        AuditEvent::new(AuditEventType::ApiRequest)
            .with_correlation_id(correlation_id_http(&req))
            .apply_user_id(acting_admin(&req))
            .with_detail("operation", "deactivate_user")
            .with_detail("target_user_id", user_id.to_string()),
    );

    Ok(HttpResponse::NoContent().finish())
}
