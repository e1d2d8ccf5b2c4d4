use crate::models::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure that will be encoded/decoded for authentication.
///
/// This is a closed struct, deliberately not an open claims map: every field
/// the gateway acts on is typed here, so a claim can't be smuggled in or
/// confused with another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Username, carried for audit correlation
    pub username: String,
    /// Roles granted to this token; never empty
    pub roles: Vec<Role>,
    /// JWT ID (unique identifier for the token, 128-bit random)
    pub jti: String,
    /// Token family minted at login; shared by the access/refresh pair and
    /// every pair produced by rotating it
    pub fam: String,
    /// Access or refresh
    pub token_type: TokenType,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
    /// Issuer
    pub iss: String,
}
