use serde::Serialize;

/// A JAX-RS application mounted under a base path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub deployment: String,
    /// `context_root + application_path`, normalised.
    pub base_path: String,
    pub application_class: Option<String>,
    /// Root resource classes, sorted.
    pub resources: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("base path '{base_path}' is already mounted by '{existing}'; '{rejected}' not mounted")]
    Conflict {
        base_path: String,
        existing: String,
        rejected: String,
    },
}

/// Mounted REST applications, published by the `rest` module.
pub trait RestEndpoints: Send + Sync {
    /// All mounts, ordered by base path.
    fn mounts(&self) -> Vec<Mount>;

    fn mount_of(&self, deployment: &str) -> Option<Mount>;

    /// Mount serving `request_path`: the longest base path that prefixes it on a
    /// segment boundary.
    fn resolve(&self, request_path: &str) -> Option<Mount>;
}
