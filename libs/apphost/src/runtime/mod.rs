mod manager;
mod runner;

pub use manager::{DeploymentOutcome, ManagerBuilder, ModuleManager, ModuleState, StartupError};
pub use runner::{RunOptions, ShutdownOptions, run};
