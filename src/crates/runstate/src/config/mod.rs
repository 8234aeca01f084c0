//! Configuration module for runstate
//!
//! TOML server configuration: listener, database, security mode and the
//! engine's lease, batch and retry settings.

pub mod server;

pub use server::security::{security_middleware, SecurityState};
pub use server::{
    DatabaseConfig, EngineConfig, SecurityConfig, SecurityMode, ServerConfig, ServerConfigError,
    ServerInfoConfig,
};
