//! Configuration Module
//!
//! Configuration loading for the proxy service, from environment variables.

mod settings;

pub use settings::{
    ConfigError, Environment, ProxyConfig, SecuritySettings, ServerSettings, StreamSettings,
    WebSocketSettings,
};

pub use crate::infrastructure::exchange::Credentials;
