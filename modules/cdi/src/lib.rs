#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! CDI plugin: finds bean archives among deployed applications.

pub mod config;
pub mod contract;
mod module;
mod sniffer;

pub use config::CdiConfig;
pub use contract::{BeanArchive, BeanArchiveKind, BeanArchives, DiscoveryMode};
pub use module::CdiModule;
pub use sniffer::{BEAN_ARCHIVE_KEY, CDI, CdiSniffer, DISCOVERY_MODE_KEY};
