use serde::{Deserialize, Serialize};

/// Configuration for the REST module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestConfig {
    /// Application path for deployments that declare resources but neither
    /// `@ApplicationPath` nor a `web.xml` mapping.
    #[serde(default = "default_application_path")]
    pub default_application_path: String,
    /// Log every resource class when a deployment is mounted.
    #[serde(default)]
    pub log_resources: bool,
}

fn default_application_path() -> String {
    "/".to_owned()
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            default_application_path: default_application_path(),
            log_resources: false,
        }
    }
}
