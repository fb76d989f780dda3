use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use apphost::deployment::normalize_context_root;
use apphost::system::{ConfigModule, LoggingModule};
use apphost::{
    DeploymentAware, DeploymentRecord, Event, EventListener, ExposedObject, Module, ModuleCtx,
    Registrator, RegistryBuilder, Sniffer, SpecificationId, TypeKey,
};

use crate::config::RestConfig;
use crate::contract::{Mount, MountError, RestEndpoints};
use crate::sniffer::{APPLICATION_CLASS_KEY, APPLICATION_PATH_KEY, JAX_RS, JaxRsSniffer, RESOURCES_KEY};

/// Mount table keyed by base path.
#[derive(Default)]
struct MountTable {
    by_base: RwLock<BTreeMap<String, Mount>>,
}

impl MountTable {
    fn mount(&self, mount: Mount) -> Result<(), MountError> {
        let mut table = self.by_base.write();
        if let Some(existing) = table.get(&mount.base_path)
            && existing.deployment != mount.deployment
        {
            return Err(MountError::Conflict {
                base_path: mount.base_path,
                existing: existing.deployment.clone(),
                rejected: mount.deployment,
            });
        }
        table.insert(mount.base_path.clone(), mount);
        Ok(())
    }

    fn unmount(&self, deployment: &str) -> Vec<Mount> {
        let mut table = self.by_base.write();
        let bases: Vec<String> = table
            .values()
            .filter(|m| m.deployment == deployment)
            .map(|m| m.base_path.clone())
            .collect();
        bases.iter().filter_map(|b| table.remove(b)).collect()
    }

    fn clear(&self) {
        self.by_base.write().clear();
    }
}

fn serves(base: &str, path: &str) -> bool {
    base == "/"
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

impl RestEndpoints for MountTable {
    fn mounts(&self) -> Vec<Mount> {
        self.by_base.read().values().cloned().collect()
    }

    fn mount_of(&self, deployment: &str) -> Option<Mount> {
        self.by_base
            .read()
            .values()
            .find(|m| m.deployment == deployment)
            .cloned()
    }

    fn resolve(&self, request_path: &str) -> Option<Mount> {
        self.by_base
            .read()
            .values()
            .filter(|m| serves(&m.base_path, request_path))
            .max_by_key(|m| m.base_path.len())
            .cloned()
    }
}

/// REST module: mounts JAX-RS deployments at `context_root + application_path`.
///
/// Two deployments resolving to the same base path are a conflict: the later one is
/// refused (its registration fails) and stays unmounted.
pub struct RestModule {
    config: ArcSwap<RestConfig>,
    table: Arc<MountTable>,
}

impl Default for RestModule {
    fn default() -> Self {
        Self::new()
    }
}

impl RestModule {
    pub const NAME: &'static str = "rest";

    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ArcSwap::from_pointee(RestConfig::default()),
            table: Arc::new(MountTable::default()),
        }
    }

    /// Currently active configuration.
    #[must_use]
    pub fn config(&self) -> Arc<RestConfig> {
        self.config.load_full()
    }

    fn mount_for(&self, record: &DeploymentRecord) -> Mount {
        let cfg = self.config.load();
        let application_path = record
            .data(APPLICATION_PATH_KEY)
            .unwrap_or(&cfg.default_application_path);
        Mount {
            deployment: record.name.clone(),
            base_path: normalize_context_root(&format!(
                "{}/{application_path}",
                record.context_root
            )),
            application_class: record.data(APPLICATION_CLASS_KEY).map(str::to_owned),
            resources: record
                .data(RESOURCES_KEY)
                .map(|r| {
                    r.split(',')
                        .map(str::trim)
                        .filter(|class| !class.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Module for RestModule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[LoggingModule::NAME, ConfigModule::NAME]
    }

    fn provided_specifications(&self) -> Vec<SpecificationId> {
        vec![SpecificationId::from_static(JAX_RS)]
    }

    fn sniffer(&self) -> Option<Box<dyn Sniffer>> {
        Some(Box::new(JaxRsSniffer::new()))
    }

    fn exposed_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::of::<dyn RestEndpoints>()]
    }

    fn runtime_objects(&self) -> Vec<ExposedObject> {
        let endpoints: Arc<dyn RestEndpoints> = self.table.clone();
        vec![ExposedObject::new::<dyn RestEndpoints>(endpoints)]
    }

    async fn configure(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: RestConfig = ctx.config()?;
        tracing::debug!(default_application_path = %cfg.default_application_path, "REST module configured");
        self.config.store(Arc::new(cfg));
        Ok(())
    }

    async fn start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        tracing::info!("REST module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.table.clear();
        Ok(())
    }

    fn deployment_aware(&self) -> Option<&dyn DeploymentAware> {
        Some(self)
    }

    fn event_listener(&self) -> Option<&dyn EventListener> {
        Some(self)
    }
}

#[async_trait]
impl DeploymentAware for RestModule {
    async fn register_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()> {
        if !record.has_specification(JAX_RS) {
            return Ok(());
        }
        let mount = self.mount_for(record);
        let base_path = mount.base_path.clone();
        let resources = mount.resources.clone();
        self.table.mount(mount)?;

        tracing::info!(
            deployment = %record.name,
            base_path = %base_path,
            resources = resources.len(),
            "JAX-RS application mounted"
        );
        if self.config.load().log_resources {
            for resource in &resources {
                tracing::info!(deployment = %record.name, resource = %resource, "resource");
            }
        }
        Ok(())
    }

    async fn unregister_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()> {
        for mount in self.table.unmount(&record.name) {
            tracing::info!(deployment = %record.name, base_path = %mount.base_path, "JAX-RS application unmounted");
        }
        Ok(())
    }
}

#[async_trait]
impl EventListener for RestModule {
    async fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        let Some(document) = event.configuration_for(Self::NAME) else {
            return Ok(());
        };
        // A bad update keeps the previous configuration.
        let cfg = document
            .get("config")
            .map(RestConfig::deserialize)
            .transpose()
            .context("invalid rest configuration")?
            .unwrap_or_default();
        tracing::info!(default_application_path = %cfg.default_application_path, "REST configuration reloaded");
        self.config.store(Arc::new(cfg));
        Ok(())
    }
}

fn register(builder: &mut RegistryBuilder) {
    builder.register(Arc::new(RestModule::new()));
}

inventory::submit! { Registrator(register) }
