#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Module orchestration and deployment sniffing.
//!
//! Modules are registered with a [`RegistryBuilder`] (or discovered through `inventory`),
//! ordered by their dependencies and driven through their lifecycle by the
//! [`ModuleManager`]. Deploying an archive runs every running module's [`Sniffer`] over
//! it, merges the detected data with the configured [`DeploymentDataRetriever`]s and
//! hands the resulting [`DeploymentRecord`] to all deployment-aware modules.

pub mod archive;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod contracts;
pub mod deployment;
pub mod events;
pub mod logging;
pub mod registry;
pub mod report;
pub mod runtime;
pub mod runtime_objects;
pub mod sniffer;
pub mod system;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use archive::{ArchiveContent, ArchiveError, ArchiveItem, ClassDescriptor, open_archive};
pub use bootstrap::AppConfig;
pub use config::{ConfigError, ConfigStore, InMemoryConfigStore};
pub use context::ModuleCtx;
pub use contracts::{DeploymentAware, EventListener, Module};
pub use deployment::{
    DeploymentDataRetriever, DeploymentDescriptor, DeploymentError, DeploymentRecord,
};
pub use events::{Event, EventBus, EventCode, EventPayload};
pub use registry::{ModuleRegistry, Registrator, RegistryBuilder, RegistryError};
pub use report::{ModuleFailure, Phase, PhaseReport};
pub use runtime::{ModuleManager, ModuleState, RunOptions, ShutdownOptions, StartupError, run};
pub use runtime_objects::{ExposedObject, RuntimeObjects, RuntimeObjectsError, TypeKey};
pub use sniffer::{Sniffer, SpecificationId};
