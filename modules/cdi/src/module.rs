use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::RwLock;

use apphost::system::{ConfigModule, LoggingModule};
use apphost::{
    DeploymentAware, DeploymentRecord, ExposedObject, Module, ModuleCtx, Registrator,
    RegistryBuilder, Sniffer, SpecificationId, TypeKey,
};

use crate::config::CdiConfig;
use crate::contract::{BeanArchive, BeanArchiveKind, BeanArchives, DiscoveryMode};
use crate::sniffer::{BEAN_ARCHIVE_KEY, CDI, CdiSniffer, DISCOVERY_MODE_KEY};

#[derive(Default)]
struct BeanArchiveTable {
    by_deployment: RwLock<BTreeMap<String, BeanArchive>>,
}

impl BeanArchives for BeanArchiveTable {
    fn archives(&self) -> Vec<BeanArchive> {
        self.by_deployment.read().values().cloned().collect()
    }

    fn get(&self, deployment: &str) -> Option<BeanArchive> {
        self.by_deployment.read().get(deployment).cloned()
    }
}

/// Reads a bean archive description back out of sniffed deployment data.
fn bean_archive(record: &DeploymentRecord) -> anyhow::Result<BeanArchive> {
    let kind = record
        .data(BEAN_ARCHIVE_KEY)
        .ok_or_else(|| anyhow::anyhow!("'{BEAN_ARCHIVE_KEY}' missing"))?
        .parse::<BeanArchiveKind>()
        .map_err(anyhow::Error::msg)?;
    let discovery_mode = record
        .data(DISCOVERY_MODE_KEY)
        .unwrap_or(DiscoveryMode::All.as_str())
        .parse::<DiscoveryMode>()
        .map_err(anyhow::Error::msg)?;
    Ok(BeanArchive {
        deployment: record.name.clone(),
        kind,
        discovery_mode,
    })
}

/// Tracks which deployments are CDI bean archives.
pub struct CdiModule {
    config: ArcSwap<CdiConfig>,
    table: Arc<BeanArchiveTable>,
}

impl Default for CdiModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CdiModule {
    pub const NAME: &'static str = "cdi";

    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ArcSwap::from_pointee(CdiConfig::default()),
            table: Arc::new(BeanArchiveTable::default()),
        }
    }
}

#[async_trait]
impl Module for CdiModule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[LoggingModule::NAME, ConfigModule::NAME]
    }

    fn provided_specifications(&self) -> Vec<SpecificationId> {
        vec![SpecificationId::from_static(CDI)]
    }

    fn sniffer(&self) -> Option<Box<dyn Sniffer>> {
        Some(Box::new(CdiSniffer::new()))
    }

    fn exposed_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::of::<dyn BeanArchives>()]
    }

    fn runtime_objects(&self) -> Vec<ExposedObject> {
        let archives: Arc<dyn BeanArchives> = self.table.clone();
        vec![ExposedObject::new::<dyn BeanArchives>(archives)]
    }

    async fn configure(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: CdiConfig = ctx.config()?;
        self.config.store(Arc::new(cfg));
        Ok(())
    }

    async fn start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        tracing::info!(
            implicit_enabled = self.config.load().implicit_enabled,
            "CDI module started"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.table.by_deployment.write().clear();
        Ok(())
    }

    fn deployment_aware(&self) -> Option<&dyn DeploymentAware> {
        Some(self)
    }
}

#[async_trait]
impl DeploymentAware for CdiModule {
    async fn register_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()> {
        if !record.has_specification(CDI) {
            return Ok(());
        }
        let archive = bean_archive(record)?;
        if archive.kind == BeanArchiveKind::Implicit && !self.config.load().implicit_enabled {
            tracing::debug!(deployment = %record.name, "implicit bean archive ignored");
            return Ok(());
        }
        tracing::info!(
            deployment = %record.name,
            kind = archive.kind.as_str(),
            discovery_mode = %archive.discovery_mode,
            "bean archive registered"
        );
        self.table
            .by_deployment
            .write()
            .insert(record.name.clone(), archive);
        Ok(())
    }

    async fn unregister_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()> {
        if self.table.by_deployment.write().remove(&record.name).is_some() {
            tracing::info!(deployment = %record.name, "bean archive removed");
        }
        Ok(())
    }
}

fn register(builder: &mut RegistryBuilder) {
    builder.register(Arc::new(CdiModule::new()));
}

inventory::submit! { Registrator(register) }
