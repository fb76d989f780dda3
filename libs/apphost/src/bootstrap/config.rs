use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ConfigStore, InMemoryConfigStore};
use crate::deployment::{DeploymentDescriptor, PropertiesFileRetriever};
use crate::logging::LoggingConfig;
use crate::runtime::{RunOptions, ShutdownOptions};
use crate::system::LoggingModule;

/// Environment variables with this prefix override file values; `__` separates keys,
/// e.g. `APPHOST__LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "APPHOST__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SniffingConfig {
    pub fast_detection: bool,
}

impl Default for SniffingConfig {
    fn default() -> Self {
        Self {
            fast_detection: true,
        }
    }
}

/// Whole application configuration.
///
/// ```yaml
/// logging:
///   level: info
/// sniffing:
///   fast_detection: true
/// modules:
///   rest:
///     config:
///       default_application_path: /api
/// deployments:
///   - archive: /srv/apps/shop.war
///     context_root: /store
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub sniffing: SniffingConfig,
    /// Per-module documents, each `{ "config": ... }`.
    pub modules: BTreeMap<String, serde_json::Value>,
    pub deployments: Vec<DeploymentDescriptor>,
}

impl AppConfig {
    /// Defaults, then the YAML file (if given), then `APPHOST__*` variables.
    ///
    /// # Errors
    /// A given file that does not exist, or any layer that does not fit the schema.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                bail!("config file '{}' not found", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment.extract().with_context(|| match path {
            Some(p) => format!("invalid configuration in '{}'", p.display()),
            None => "invalid configuration".to_owned(),
        })
    }

    /// Sorted names of the configured modules.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Config store with every module document. The top-level `logging` section
    /// becomes the `logging` module's `config`.
    ///
    /// # Errors
    /// The logging section cannot be represented as JSON.
    pub fn config_store(&self) -> anyhow::Result<InMemoryConfigStore> {
        let mut modules = self.modules.clone();
        let logging = serde_json::to_value(&self.logging).context("serialize logging section")?;
        modules.insert(LoggingModule::NAME.to_owned(), json!({ "config": logging }));
        Ok(InMemoryConfigStore::from_modules(modules))
    }

    /// Runner options for this configuration: discovered modules, the properties
    /// side-file retriever and the configured deployments.
    ///
    /// # Errors
    /// See [`AppConfig::config_store`].
    pub fn run_options(&self, shutdown: ShutdownOptions) -> anyhow::Result<RunOptions> {
        let store: Arc<dyn ConfigStore> = Arc::new(self.config_store()?);
        let mut opts = RunOptions::new(store, shutdown);
        opts.fast_detection = self.sniffing.fast_detection;
        opts.retrievers.push(Arc::new(PropertiesFileRetriever));
        opts.deployments.clone_from(&self.deployments);
        Ok(opts)
    }
}
