use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::context::ModuleCtx;
use crate::contracts::Module;
use crate::events::Event;
use crate::system::LoggingModule;
use crate::registry::{Registrator, RegistryBuilder};
use crate::report::PhaseReport;
use crate::runtime_objects::{ExposedObject, TypeKey};

/// Read/update access to module configuration documents for other modules.
#[async_trait]
pub trait ConfigService: Send + Sync {
    /// Whole configuration document of `module` (`{"config": ...}`), if any.
    fn get(&self, module: &str) -> Option<serde_json::Value>;

    /// Replace the document of `module` and notify listeners with
    /// `CONFIGURATION_UPDATE`. Listener failures are reported, not returned.
    async fn update(&self, module: &str, value: serde_json::Value) -> PhaseReport;
}

struct StoreBackedConfig {
    ctx: ModuleCtx,
}

#[async_trait]
impl ConfigService for StoreBackedConfig {
    fn get(&self, module: &str) -> Option<serde_json::Value> {
        self.ctx.config_store().get(module)
    }

    async fn update(&self, module: &str, value: serde_json::Value) -> PhaseReport {
        self.ctx.config_store().set(module, value.clone());
        tracing::info!(module, "configuration updated");
        self.ctx
            .events()
            .publish(Event::configuration_update(module, value))
            .await
    }
}

/// Publishes [`ConfigService`] as a runtime object.
#[derive(Default)]
pub struct ConfigModule {
    service: ArcSwapOption<StoreBackedConfig>,
}

impl ConfigModule {
    pub const NAME: &'static str = "config";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Module for ConfigModule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[LoggingModule::NAME]
    }

    fn exposed_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::of::<dyn ConfigService>()]
    }

    fn runtime_objects(&self) -> Vec<ExposedObject> {
        self.service
            .load_full()
            .map(|svc| {
                let svc: Arc<dyn ConfigService> = svc;
                vec![ExposedObject::new::<dyn ConfigService>(svc)]
            })
            .unwrap_or_default()
    }

    async fn start(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.service
            .store(Some(Arc::new(StoreBackedConfig { ctx: ctx.clone() })));
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.service.store(None);
        Ok(())
    }
}

fn register(builder: &mut RegistryBuilder) {
    builder.register(Arc::new(ConfigModule::new()));
}

inventory::submit! { Registrator(register) }
