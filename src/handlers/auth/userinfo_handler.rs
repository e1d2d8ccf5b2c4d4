use actix_web::{HttpMessage, HttpRequest, HttpResponse};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AuthenticatedUser, Role};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoResponse {
    pub id: Uuid,
    pub username: String,
    pub roles: Vec<Role>,
}

/// GET /auth/me
///
/// Echoes the identity the authentication stage resolved for this request.
pub async fn me(req: HttpRequest) -> Result<HttpResponse, AppError> {
    let identity = req
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| AppError::TokenMalformed("missing bearer token".to_string()))?;

    Ok(HttpResponse::Ok().json(UserInfoResponse {
        id: identity.user_id,
        username: identity.username,
        roles: identity.roles,
    }))
}
