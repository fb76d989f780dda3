//! Modules shipped with the core and registered through `inventory`.

mod config_module;
mod logging_module;

pub use config_module::{ConfigModule, ConfigService};
pub use logging_module::LoggingModule;
