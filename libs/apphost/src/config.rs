//! Module configuration store and typed loaders.
//!
//! Configuration is a JSON document per module, shaped `{ "config": { ... } }`. The store
//! is writable at runtime; writers publish `CONFIGURATION_UPDATE` so running modules can
//! reload (see `ConfigService` and `ModuleManager::update_config`).
//!
//! Two loaders:
//!
//! 1. **Lenient** (`module_config_or_default`): falls back to `T::default()` when the
//!    module or its `config` section is absent.
//! 2. **Strict** (`module_config_required`): every missing piece is an error.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

/// Configuration error for typed config operations
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("module '{module}' not found")]
    ModuleNotFound { module: String },
    #[error("module '{module}' config must be an object")]
    InvalidModuleStructure { module: String },
    #[error("missing 'config' section in module '{module}'")]
    MissingConfigSection { module: String },
    #[error("invalid config for module '{module}': {source}")]
    InvalidConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read/write key-value store of raw module configuration, keyed by module name.
pub trait ConfigStore: Send + Sync {
    /// Raw JSON document of the module, if any.
    fn get(&self, module: &str) -> Option<serde_json::Value>;

    /// Replace the module's document.
    fn set(&self, module: &str, value: serde_json::Value);

    /// Names of all modules with a stored document, sorted.
    fn module_names(&self) -> Vec<String>;
}

/// Default `ConfigStore` backed by a map under a single lock.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    modules: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a `{ "<module>": { "config": ... } }` map.
    #[must_use]
    pub fn from_modules(modules: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            modules: RwLock::new(modules),
        }
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, module: &str) -> Option<serde_json::Value> {
        self.modules.read().get(module).cloned()
    }

    fn set(&self, module: &str, value: serde_json::Value) {
        self.modules.write().insert(module.to_owned(), value);
    }

    fn module_names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }
}

fn parse_section<T: DeserializeOwned>(
    module_name: &str,
    section: &serde_json::Value,
) -> Result<T, ConfigError> {
    serde_json::from_value(section.clone()).map_err(|e| ConfigError::InvalidConfig {
        module: module_name.to_owned(),
        source: e,
    })
}

/// Lenient configuration loader that falls back to defaults.
///
/// - module absent, not an object, or without `config` → `Ok(T::default())`
/// - `config` present but invalid → `Err(ConfigError::InvalidConfig)`
///
/// # Errors
/// Returns `ConfigError::InvalidConfig` if the config section exists but cannot be deserialized.
pub fn module_config_or_default<T: DeserializeOwned + Default>(
    store: &dyn ConfigStore,
    module_name: &str,
) -> Result<T, ConfigError> {
    let Some(module_raw) = store.get(module_name) else {
        return Ok(T::default());
    };
    let Some(section) = module_raw.as_object().and_then(|o| o.get("config")) else {
        return Ok(T::default());
    };
    parse_section(module_name, section)
}

/// Strict configuration loader that requires configuration to be present.
///
/// # Errors
/// Returns `ConfigError` if the module is not found, has invalid structure, lacks a
/// `config` section, or the section does not deserialize into `T`.
pub fn module_config_required<T: DeserializeOwned>(
    store: &dyn ConfigStore,
    module_name: &str,
) -> Result<T, ConfigError> {
    let module_raw = store
        .get(module_name)
        .ok_or_else(|| ConfigError::ModuleNotFound {
            module: module_name.to_owned(),
        })?;

    let obj = module_raw
        .as_object()
        .ok_or_else(|| ConfigError::InvalidModuleStructure {
            module: module_name.to_owned(),
        })?;

    let section = obj
        .get("config")
        .ok_or_else(|| ConfigError::MissingConfigSection {
            module: module_name.to_owned(),
        })?;

    parse_section(module_name, section)
}
