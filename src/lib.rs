pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod security;
pub mod services;
pub mod stores;

pub use config::AppSettings;
pub use error::{AppError, AppResult};
