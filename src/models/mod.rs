pub mod auth_claims;
pub mod authenticated_user;
pub mod user;

pub use auth_claims::{Claims, TokenType};
pub use authenticated_user::AuthenticatedUser;
pub use user::{Role, User};
