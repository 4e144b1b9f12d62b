pub mod auth;
pub mod config;
pub mod middleware;
pub mod models;
pub mod service;
pub mod upload;

pub use config::{ConfigError, LogFormat, ServerConfig};
pub use service::{AppState, build_router, create_app};
