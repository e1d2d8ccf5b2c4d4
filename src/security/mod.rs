pub mod csrf;
pub mod password;

pub use csrf::{CsrfGuard, CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
