use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

/// Gateway error taxonomy.
///
/// Token-validation subtypes (`TokenExpired`, `TokenMalformed`, `TokenRevoked`,
/// `TokenReused`, `TokenWrongType`) are distinguished internally and in audit
/// events, but all collapse into one generic 401 body toward the caller so the
/// response is not an oracle for why a token failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    InvalidCredentials,
    TokenExpired,
    TokenMalformed(String),
    TokenRevoked,
    TokenReused,
    TokenWrongType,
    CsrfMissing,
    CsrfMismatch(String),
    RateLimitExceeded(String),
    RoleDenied(String),
    PayloadTooLarge(usize),
    StoreUnavailable(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
    Configuration(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    error_type: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidCredentials => write!(f, "Invalid username or password"),
            AppError::TokenExpired => write!(f, "Token has expired"),
            AppError::TokenMalformed(e) => write!(f, "Malformed token: {}", e),
            AppError::TokenRevoked => write!(f, "Token has been revoked"),
            AppError::TokenReused => write!(f, "Rotated refresh token was replayed"),
            AppError::TokenWrongType => write!(f, "Token type not valid for this operation"),
            AppError::CsrfMissing => write!(f, "CSRF token missing"),
            AppError::CsrfMismatch(e) => write!(f, "CSRF validation failed: {}", e),
            AppError::RateLimitExceeded(key) => write!(f, "Rate limit exceeded for {}", key),
            AppError::RoleDenied(e) => write!(f, "Insufficient role: {}", e),
            AppError::PayloadTooLarge(max) => {
                write!(f, "Request body exceeds the {} byte limit", max)
            }
            AppError::StoreUnavailable(e) => write!(f, "Shared store unavailable: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::NotFound(e) => write!(f, "Not found: {}", e),
            AppError::Conflict(e) => write!(f, "Conflict: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl StdError for AppError {}

impl AppError {
    /// True for every token/credential failure that must be indistinguishable
    /// to the caller.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AppError::InvalidCredentials
                | AppError::TokenExpired
                | AppError::TokenMalformed(_)
                | AppError::TokenRevoked
                | AppError::TokenReused
                | AppError::TokenWrongType
        )
    }

    fn error_type(&self) -> &'static str {
        match self {
            e if e.is_auth_failure() => "authentication_error",
            AppError::CsrfMissing | AppError::CsrfMismatch(_) => "csrf_error",
            AppError::RateLimitExceeded(_) => "too_many_requests",
            AppError::RoleDenied(_) => "forbidden",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::StoreUnavailable(_) => "service_unavailable",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Configuration(_) => "configuration_error",
            _ => "internal_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_auth_failure() => StatusCode::UNAUTHORIZED,
            AppError::CsrfMissing | AppError::CsrfMismatch(_) => StatusCode::FORBIDDEN,
            AppError::RoleDenied(_) => StatusCode::FORBIDDEN,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        // Collapse every authentication subtype into the same body. The audit
        // log keeps the specific reason for operators.
        let message = if self.is_auth_failure() {
            "Authentication failed".to_string()
        } else {
            self.to_string()
        };

        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message,
            error_type: self.error_type().to_string(),
        };

        HttpResponse::build(status_code).json(error_response)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", error))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_subtypes_share_a_generic_401() {
        for err in [
            AppError::TokenExpired,
            AppError::TokenMalformed("bad header".into()),
            AppError::TokenRevoked,
            AppError::TokenReused,
            AppError::TokenWrongType,
            AppError::InvalidCredentials,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert!(err.is_auth_failure());
        }
    }

    #[test]
    fn distinct_status_codes_for_non_auth_failures() {
        assert_eq!(
            AppError::RateLimitExceeded("ip:1.2.3.4".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::CsrfMissing.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RoleDenied("admin required".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::PayloadTooLarge(10).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::StoreUnavailable("redis".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Configuration("missing".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
