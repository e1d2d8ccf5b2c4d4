use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role set recognized by the gateway. Roles are additive; a token may carry
/// more than one, and every issued token carries at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    ReadOnly,
    Service,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::ReadOnly => "readonly",
            Role::Service => "service",
        };
        write!(f, "{}", s)
    }
}

/// Identity record. Accounts are never deleted in place; `active` is flipped
/// off instead so audit events keep a valid referent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Algorithm-tagged PHC/bcrypt hash string. Never serialized to clients.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub active: bool,
}
