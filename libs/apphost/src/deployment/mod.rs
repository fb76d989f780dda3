//! Deployments: what the user asks for (`DeploymentDescriptor`) and what the runtime
//! hands to modules once the archive was sniffed (`DeploymentRecord`).

mod pipeline;
pub mod properties;
mod retriever;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::archive::{ArchiveError, WalkStats};
use crate::sniffer::SpecificationId;

pub use pipeline::{SniffOutcome, SniffingPipeline};
pub use retriever::{DeploymentDataRetriever, PropertiesFileRetriever, StaticDataRetriever};

/// Data key that overrides the derived context root.
pub const CONTEXT_ROOT_KEY: &str = "context-root";

/// A deployment request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentDescriptor {
    /// Deployment name; defaults to the archive's file stem.
    #[serde(default)]
    pub name: Option<String>,
    pub archive: PathBuf,
    #[serde(default)]
    pub context_root: Option<String>,
    /// Explicit properties side-file.
    #[serde(default)]
    pub properties: Option<PathBuf>,
    /// Inline user data; applied after every retriever.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl DeploymentDescriptor {
    #[must_use]
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_context_root(mut self, context_root: impl Into<String>) -> Self {
        self.context_root = Some(context_root.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Finalized description of one deployed archive. Immutable; shared as `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRecord {
    pub id: Uuid,
    pub name: String,
    pub archive: PathBuf,
    pub context_root: String,
    pub specifications: BTreeSet<SpecificationId>,
    pub data: BTreeMap<String, String>,
    /// Sniffers that triggered, in sniffer order.
    pub sniffers: Vec<&'static str>,
    pub stats: WalkStats,
}

impl DeploymentRecord {
    /// Merge sniffer output with retriever data (retrievers win) and resolve the
    /// context root.
    #[must_use]
    pub fn assemble(
        name: String,
        descriptor: &DeploymentDescriptor,
        sniffed: SniffOutcome,
        retrieved: BTreeMap<String, String>,
    ) -> Self {
        let mut data = sniffed.data;
        data.extend(retrieved);

        let context_root = resolve_context_root(
            descriptor.context_root.as_deref(),
            data.get(CONTEXT_ROOT_KEY).map(String::as_str),
            &name,
        );

        Self {
            id: Uuid::now_v7(),
            name,
            archive: descriptor.archive.clone(),
            context_root,
            specifications: sniffed.specifications,
            data,
            sniffers: sniffed.triggered,
            stats: sniffed.stats,
        }
    }

    #[must_use]
    pub fn has_specification(&self, id: &str) -> bool {
        self.specifications.iter().any(|s| s.as_str() == id)
    }

    #[must_use]
    pub fn data(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// user-supplied → data `context-root` → `/<name>` (`ROOT` is `/`).
#[must_use]
pub fn resolve_context_root(user: Option<&str>, from_data: Option<&str>, name: &str) -> String {
    match user.or(from_data) {
        Some(root) => normalize_context_root(root),
        None if name == "ROOT" => "/".to_owned(),
        None => normalize_context_root(name),
    }
}

/// Leading `/`, no trailing `/`, no empty segments; empty input is `/`.
#[must_use]
pub fn normalize_context_root(raw: &str) -> String {
    let segments: Vec<&str> = raw.split('/').filter(|s| !s.trim().is_empty()).collect();
    if segments.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", segments.join("/"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("runtime is not started")]
    NotStarted,
    #[error("deployment '{0}' already exists")]
    AlreadyDeployed(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("deployment data retriever '{retriever}' failed for '{deployment}'")]
    Retriever {
        retriever: &'static str,
        deployment: String,
        #[source]
        source: anyhow::Error,
    },
}
