pub mod login_handler;
pub mod logout_handler;
pub mod refresh_handler;
pub mod userinfo_handler;

pub use login_handler::login;
pub use logout_handler::logout;
pub use refresh_handler::refresh;
pub use userinfo_handler::me;

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use serde::Serialize;

use crate::security::CSRF_COOKIE_NAME;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in_secs: i64,
}

// The CSRF cookie is deliberately script-readable: double-submit requires the
// page to copy the value into the X-CSRF-Token header, which a cross-origin
// attacker cannot do.
pub(crate) fn csrf_cookie(value: String, hours: i64) -> Cookie<'static> {
    Cookie::build(CSRF_COOKIE_NAME, value)
        .path("/")
        .secure(true)
        .http_only(false)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::hours(hours))
        .finish()
}

pub(crate) fn csrf_removal_cookie() -> Cookie<'static> {
    Cookie::build(CSRF_COOKIE_NAME, "")
        .path("/")
        .secure(true)
        .http_only(false)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::ZERO)
        .finish()
}
