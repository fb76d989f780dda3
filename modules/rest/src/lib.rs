#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Web-tier plugin: recognises JAX-RS applications in deployed archives and mounts them
//! under their context root.

pub mod config;
pub mod contract;
mod module;
mod sniffer;
mod web_xml;

pub use config::RestConfig;
pub use contract::{Mount, MountError, RestEndpoints};
pub use module::RestModule;
pub use sniffer::{
    APPLICATION_CLASS_KEY, APPLICATION_PATH_KEY, JAX_RS, JaxRsSniffer, RESOURCES_KEY,
};
