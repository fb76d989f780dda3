//! Application configuration loading.

mod config;

pub use config::{AppConfig, ENV_PREFIX, SniffingConfig};
