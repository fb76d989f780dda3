use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ConfigStore, module_config_or_default};
use crate::events::EventBus;
use crate::runtime_objects::RuntimeObjects;

/// Module execution context: the module's window onto the runtime.
///
/// Created once per module by the `ModuleManager` just before `configure`, and passed
/// to both `configure` and `start`. Provides:
/// - **Configuration**: typed config via `config()`, raw store via `config_store()`
/// - **Capabilities**: other modules' runtime objects via `runtime_objects()`
/// - **Events**: the bus, for modules that publish (e.g. the config module)
/// - **Lifecycle**: a cancellation token, cancelled right before the module's `stop`
///
/// ```ignore
/// async fn start(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
///     let cfg: MyConfig = ctx.config()?;
///     let endpoints = ctx.runtime_objects().get::<dyn RestEndpoints>()?;
///     let cancel = ctx.cancellation_token().clone();
///     tokio::spawn(async move { cancel.cancelled().await; });
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ModuleCtx {
    module_name: Arc<str>,
    config_store: Arc<dyn ConfigStore>,
    runtime_objects: Arc<RuntimeObjects>,
    events: Arc<EventBus>,
    cancellation_token: CancellationToken,
}

/// Factory for per-module contexts; owned by the `ModuleManager`.
pub struct ModuleContextBuilder {
    config_store: Arc<dyn ConfigStore>,
    runtime_objects: Arc<RuntimeObjects>,
    events: Arc<EventBus>,
    root_token: CancellationToken,
}

impl ModuleContextBuilder {
    #[must_use]
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        runtime_objects: Arc<RuntimeObjects>,
        events: Arc<EventBus>,
        root_token: CancellationToken,
    ) -> Self {
        Self {
            config_store,
            runtime_objects,
            events,
            root_token,
        }
    }

    /// Context for `module_name` with a child of the root cancellation token.
    #[must_use]
    pub fn for_module(&self, module_name: &str) -> ModuleCtx {
        ModuleCtx {
            module_name: Arc::<str>::from(module_name),
            config_store: self.config_store.clone(),
            runtime_objects: self.runtime_objects.clone(),
            events: self.events.clone(),
            cancellation_token: self.root_token.child_token(),
        }
    }
}

impl ModuleCtx {
    #[inline]
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    #[inline]
    #[must_use]
    pub fn config_store(&self) -> &dyn ConfigStore {
        &*self.config_store
    }

    /// Capabilities exposed by already running modules.
    ///
    /// Only dependencies are guaranteed to be there; treat any other miss as
    /// "module not installed".
    #[inline]
    #[must_use]
    pub fn runtime_objects(&self) -> &RuntimeObjects {
        &self.runtime_objects
    }

    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Deserialize the module's `config` section into `T`, or `T::default()` if missing.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidConfig` when the section exists but does not fit `T`.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        module_config_or_default(self.config_store.as_ref(), &self.module_name)
    }

    /// Raw `config` section of the module (empty object when absent).
    #[must_use]
    pub fn raw_config(&self) -> serde_json::Value {
        self.config_store
            .get(&self.module_name)
            .and_then(|m| m.get("config").cloned())
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }
}
