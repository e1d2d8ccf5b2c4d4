use crate::models::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity resolved by the authentication middleware and inserted into the
/// request extensions for handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub roles: Vec<Role>,
    /// jti of the access token that authenticated this request
    pub token_id: String,
    /// Token family of that access token
    pub token_family: String,
}
