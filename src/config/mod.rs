pub mod settings;

pub use settings::{
    AppSettings, BootstrapConfig, RateLimitConfig, RedisConfig, SecurityConfig, ServerConfig,
};
