pub mod audit_service;
pub mod token_service;
pub mod user_store;

pub use audit_service::{AuditEvent, AuditEventType, AuditService, Severity};
pub use token_service::TokenService;
pub use user_store::UserStore;
