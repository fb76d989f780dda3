//! Module manager: drives modules through their lifecycle and deployments through
//! the modules.
//!
//! Lifecycle operations (`start_modules`, `stop_modules`, `deploy`, `undeploy`,
//! deployment (un)registration) are serialized by one async lock and run strictly
//! sequentially. Introspection is lock-free with respect to that lock.
//!
//! Start is all-or-nothing: the first module that fails aborts the run and every module
//! already started is stopped again in reverse order. Everything else is best-effort and
//! reports per-module failures in a `PhaseReport`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveContent, open_archive};
use crate::config::{ConfigStore, InMemoryConfigStore};
use crate::context::{ModuleContextBuilder, ModuleCtx};
use crate::contracts::Module;
use crate::deployment::{
    DeploymentDataRetriever, DeploymentDescriptor, DeploymentError, DeploymentRecord,
    SniffingPipeline,
};
use crate::events::{Event, EventBus};
use crate::registry::ModuleRegistry;
use crate::report::{Phase, PhaseReport};
use crate::runtime_objects::{RuntimeObjects, RuntimeObjectsError, TypeKey};
use crate::sniffer::SpecificationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Uninitialized => "UNINITIALIZED",
            ModuleState::Starting => "STARTING",
            ModuleState::Running => "RUNNING",
            ModuleState::Stopping => "STOPPING",
            ModuleState::Stopped => "STOPPED",
            ModuleState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Startup aborted: `module` failed in `phase`; `rollback` lists failures of the
/// best-effort stop of the modules started before it.
#[derive(Debug, thiserror::Error)]
#[error("module '{module}' failed during {phase}: {source:#}")]
pub struct StartupError {
    pub module: &'static str,
    pub phase: Phase,
    #[source]
    pub source: anyhow::Error,
    pub rollback: PhaseReport,
}

/// Result of a deployment that went through: the record plus whatever modules or
/// listeners reported while receiving it.
#[derive(Debug)]
pub struct DeploymentOutcome {
    pub record: Arc<DeploymentRecord>,
    pub report: PhaseReport,
}

#[derive(Clone)]
struct RunningModule {
    name: &'static str,
    module: Arc<dyn Module>,
    ctx: ModuleCtx,
}

pub struct ManagerBuilder {
    registry: ModuleRegistry,
    config: Option<Arc<dyn ConfigStore>>,
    retrievers: Vec<Arc<dyn DeploymentDataRetriever>>,
    pipeline: SniffingPipeline,
    cancel: Option<CancellationToken>,
}

impl ManagerBuilder {
    #[must_use]
    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(store);
        self
    }

    /// Append a retriever; later retrievers win on key collisions.
    #[must_use]
    pub fn retriever(mut self, retriever: Arc<dyn DeploymentDataRetriever>) -> Self {
        self.retrievers.push(retriever);
        self
    }

    #[must_use]
    pub fn fast_detection(mut self, enabled: bool) -> Self {
        self.pipeline = SniffingPipeline::new(enabled);
        self
    }

    /// Root of all per-module cancellation tokens.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn build(self) -> ModuleManager {
        let config = self
            .config
            .unwrap_or_else(|| Arc::new(InMemoryConfigStore::new()));
        let objects = Arc::new(RuntimeObjects::new());
        let events = Arc::new(EventBus::new());
        let cancel = self.cancel.unwrap_or_default();
        let ctx_builder =
            ModuleContextBuilder::new(config.clone(), objects.clone(), events.clone(), cancel);
        let states = self
            .registry
            .modules()
            .iter()
            .map(|e| (e.name(), ModuleState::Uninitialized))
            .collect();

        ModuleManager {
            registry: self.registry,
            config,
            objects,
            events,
            ctx_builder,
            pipeline: self.pipeline,
            retrievers: self.retrievers,
            ops: tokio::sync::Mutex::new(()),
            running: RwLock::new(Vec::new()),
            started: RwLock::new(false),
            states: RwLock::new(states),
            deployments: RwLock::new(Vec::new()),
        }
    }
}

/// Orchestrates module lifecycle, deployments and configuration relay.
pub struct ModuleManager {
    registry: ModuleRegistry,
    config: Arc<dyn ConfigStore>,
    objects: Arc<RuntimeObjects>,
    events: Arc<EventBus>,
    ctx_builder: ModuleContextBuilder,
    pipeline: SniffingPipeline,
    retrievers: Vec<Arc<dyn DeploymentDataRetriever>>,
    /// Serializes lifecycle operations; never taken by introspection.
    ops: tokio::sync::Mutex<()>,
    /// Running modules in start order.
    running: RwLock<Vec<RunningModule>>,
    started: RwLock<bool>,
    states: RwLock<BTreeMap<&'static str, ModuleState>>,
    /// Registered deployments in registration order.
    deployments: RwLock<Vec<Arc<DeploymentRecord>>>,
}

impl ModuleManager {
    /// Start configuring a manager over an already validated, ordered registry.
    #[must_use]
    pub fn builder(registry: ModuleRegistry) -> ManagerBuilder {
        ManagerBuilder {
            registry,
            config: None,
            retrievers: Vec::new(),
            pipeline: SniffingPipeline::default(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config_store(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    #[must_use]
    pub fn runtime_objects(&self) -> &Arc<RuntimeObjects> {
        &self.objects
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        *self.started.read()
    }

    fn set_state(&self, module: &'static str, state: ModuleState) {
        self.states.write().insert(module, state);
    }

    // ------------------------------------------------------------------ start / stop

    /// Start every module in dependency order.
    ///
    /// Per module: `configure` → `start` → register runtime objects → subscribe as
    /// listener → publish `MODULE_STARTED`. Calling it on a started manager is a no-op.
    ///
    /// # Errors
    /// `StartupError` naming the first module that failed; modules started before it have
    /// been stopped again in reverse order.
    pub async fn start_modules(&self) -> Result<(), StartupError> {
        let _guard = self.ops.lock().await;
        if self.is_started() {
            tracing::warn!("start requested but modules are already running");
            return Ok(());
        }

        tracing::info!(modules = ?self.registry.names(), "Phase: start");
        for entry in self.registry.modules() {
            let name = entry.name();
            let module = entry.module().clone();
            self.set_state(name, ModuleState::Starting);
            let ctx = self.ctx_builder.for_module(name);

            tracing::debug!(module = name, "configuring module");
            if let Err(err) = module.configure(&ctx).await {
                return Err(self.abort_start(name, Phase::Configure, err).await);
            }

            tracing::debug!(module = name, "starting module");
            if let Err(err) = module.start(&ctx).await {
                return Err(self.abort_start(name, Phase::Start, err).await);
            }

            // From here on the module is up and must be part of any rollback.
            self.running.write().push(RunningModule {
                name,
                module: module.clone(),
                ctx,
            });

            if let Err(err) = self.expose(name, module.as_ref()) {
                return Err(self.abort_start(name, Phase::Expose, err).await);
            }

            self.events.subscribe(module);
            self.set_state(name, ModuleState::Running);
            tracing::info!(module = name, "Started module");

            let report = self.events.publish(Event::module_started(name)).await;
            if !report.is_success() {
                tracing::warn!(module = name, %report, "MODULE_STARTED listeners failed");
            }
        }

        *self.started.write() = true;
        Ok(())
    }

    /// Register the module's runtime objects; only declared capability types are accepted.
    fn expose(&self, name: &'static str, module: &dyn Module) -> anyhow::Result<()> {
        let declared: BTreeSet<TypeKey> = module.exposed_types().into_iter().collect();
        for object in module.runtime_objects() {
            let key = object.key();
            if !declared.contains(&key) {
                anyhow::bail!("runtime object '{key}' was not declared in exposed_types()");
            }
            self.objects.register_exposed(name, object)?;
            tracing::debug!(module = name, capability = %key, "exposed runtime object");
        }
        Ok(())
    }

    async fn abort_start(
        &self,
        module: &'static str,
        phase: Phase,
        source: anyhow::Error,
    ) -> StartupError {
        tracing::error!(module, phase = phase.as_str(), error = %format!("{source:#}"), "module failed to start; rolling back");
        let rollback = self.stop_running().await;
        // A module that failed before it was running is not visited by the rollback.
        self.set_state(module, ModuleState::Failed);
        StartupError {
            module,
            phase,
            source,
            rollback,
        }
    }

    /// Stop running modules in reverse start order, best effort.
    async fn stop_running(&self) -> PhaseReport {
        let mut report = PhaseReport::new();
        loop {
            let Some(running) = self.running.write().pop() else {
                break;
            };
            let name = running.name;
            self.set_state(name, ModuleState::Stopping);
            self.events.unsubscribe(name);
            let removed = self.objects.remove_owned_by(name);
            if !removed.is_empty() {
                tracing::debug!(module = name, capabilities = ?removed, "withdrew runtime objects");
            }
            running.ctx.cancellation_token().cancel();

            match running.module.stop().await {
                Ok(()) => {
                    self.set_state(name, ModuleState::Stopped);
                    tracing::info!(module = name, "Stopped module");
                }
                Err(err) => {
                    self.set_state(name, ModuleState::Failed);
                    report.record(name, Phase::Stop, err);
                }
            }
            report.merge(self.events.publish(Event::module_stopped(name)).await);
        }
        report
    }

    /// Unregister all deployments, then stop modules in reverse start order.
    /// Failures are collected, never propagated.
    pub async fn stop_modules(&self) -> PhaseReport {
        let _guard = self.ops.lock().await;
        if !self.is_started() {
            return PhaseReport::new();
        }
        tracing::info!("Phase: stop");

        let mut report = PhaseReport::new();
        let registered: Vec<Arc<DeploymentRecord>> = self.deployments.read().clone();
        for record in registered.iter().rev() {
            report.merge(self.unregister_locked(record).await);
        }
        report.merge(self.stop_running().await);

        *self.started.write() = false;
        if !report.is_success() {
            tracing::warn!(%report, "stop completed with failures");
        }
        report
    }

    // ------------------------------------------------------------------ deployments

    /// Hand `record` to every deployment-aware running module, in start order.
    /// Registering an already registered record is a no-op.
    pub async fn register_deployment(&self, record: Arc<DeploymentRecord>) -> PhaseReport {
        let _guard = self.ops.lock().await;
        self.register_locked(&record).await
    }

    async fn register_locked(&self, record: &Arc<DeploymentRecord>) -> PhaseReport {
        let mut report = PhaseReport::new();
        {
            let mut deployments = self.deployments.write();
            if deployments.iter().any(|d| d.id == record.id) {
                return report;
            }
            deployments.push(record.clone());
        }

        let running: Vec<RunningModule> = self.running.read().clone();
        for m in &running {
            let Some(aware) = m.module.deployment_aware() else {
                continue;
            };
            if let Err(err) = aware.register_deployment(record).await {
                report.record(m.name, Phase::RegisterDeployment, err);
            }
        }
        report
    }

    /// Withdraw `record` from every deployment-aware running module, in reverse start
    /// order. A record that is not registered is ignored.
    pub async fn unregister_deployment(&self, record: &Arc<DeploymentRecord>) -> PhaseReport {
        let _guard = self.ops.lock().await;
        self.unregister_locked(record).await
    }

    async fn unregister_locked(&self, record: &Arc<DeploymentRecord>) -> PhaseReport {
        let mut report = PhaseReport::new();
        {
            let mut deployments = self.deployments.write();
            let Some(pos) = deployments.iter().position(|d| d.id == record.id) else {
                tracing::debug!(deployment = %record.name, "unregister of unknown deployment ignored");
                return report;
            };
            deployments.remove(pos);
        }

        let running: Vec<RunningModule> = self.running.read().clone();
        for m in running.iter().rev() {
            let Some(aware) = m.module.deployment_aware() else {
                continue;
            };
            if let Err(err) = aware.unregister_deployment(record).await {
                report.record(m.name, Phase::UnregisterDeployment, err);
            }
        }
        report.merge(self.events.publish(Event::undeployment(record.clone())).await);
        tracing::info!(deployment = %record.name, "Undeployed");
        report
    }

    /// Open the archive named by `descriptor` and deploy it.
    ///
    /// # Errors
    /// See [`ModuleManager::deploy_archive`]; additionally `DeploymentError::Archive` when
    /// the archive cannot be opened.
    pub async fn deploy(
        &self,
        descriptor: &DeploymentDescriptor,
    ) -> Result<DeploymentOutcome, DeploymentError> {
        let archive = open_archive(&descriptor.archive)?;
        self.deploy_archive(descriptor, archive.as_ref()).await
    }

    /// Sniff `archive`, merge retriever data, register the record with the modules and
    /// publish `DEPLOYMENT`.
    ///
    /// # Errors
    /// `NotStarted` before `start_modules`, `AlreadyDeployed` for a taken name, `Archive`
    /// if the walk fails and `Retriever` if any data retriever fails. Module-side
    /// registration failures do not fail the deployment; they are in the outcome report.
    pub async fn deploy_archive(
        &self,
        descriptor: &DeploymentDescriptor,
        archive: &dyn ArchiveContent,
    ) -> Result<DeploymentOutcome, DeploymentError> {
        let _guard = self.ops.lock().await;
        if !self.is_started() {
            return Err(DeploymentError::NotStarted);
        }

        let name = descriptor
            .name
            .clone()
            .unwrap_or_else(|| archive.default_name());
        if self.deployments.read().iter().any(|d| d.name == name) {
            return Err(DeploymentError::AlreadyDeployed(name));
        }

        let sniffers = self
            .running
            .read()
            .iter()
            .filter_map(|m| m.module.sniffer())
            .collect();
        let sniffed = self.pipeline.scan(archive, sniffers)?;

        let mut retrieved = BTreeMap::new();
        for retriever in &self.retrievers {
            let data = retriever
                .retrieve(descriptor)
                .map_err(|source| DeploymentError::Retriever {
                    retriever: retriever.name(),
                    deployment: name.clone(),
                    source,
                })?;
            retrieved.extend(data);
        }
        retrieved.extend(descriptor.data.clone());

        let record = Arc::new(DeploymentRecord::assemble(
            name, descriptor, sniffed, retrieved,
        ));

        let mut report = self.register_locked(&record).await;
        report.merge(self.events.publish(Event::deployment(record.clone())).await);

        tracing::info!(
            deployment = %record.name,
            context_root = %record.context_root,
            specifications = ?record.specifications,
            failures = report.failures().len(),
            "Deployed"
        );
        Ok(DeploymentOutcome { record, report })
    }

    /// Undeploy by name; unknown names are a no-op.
    pub async fn undeploy(&self, name: &str) -> PhaseReport {
        let _guard = self.ops.lock().await;
        let record = self
            .deployments
            .read()
            .iter()
            .find(|d| d.name == name)
            .cloned();
        match record {
            Some(record) => self.unregister_locked(&record).await,
            None => PhaseReport::new(),
        }
    }

    // ------------------------------------------------------------------ config & lookup

    /// Store a new configuration document for `module` and publish
    /// `CONFIGURATION_UPDATE` to the running listeners.
    pub async fn update_config(&self, module: &str, value: serde_json::Value) -> PhaseReport {
        self.config.set(module, value.clone());
        self.events
            .publish(Event::configuration_update(module, value))
            .await
    }

    /// Registry lookup of a capability exposed by a running module.
    ///
    /// # Errors
    /// `RuntimeObjectsError::NotFound` when no running module provides `T`.
    pub fn get_exposed_object<T>(&self) -> Result<Arc<T>, RuntimeObjectsError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.objects.get::<T>()
    }

    // ------------------------------------------------------------------ introspection

    /// `(module, state)` in start order.
    #[must_use]
    pub fn module_states(&self) -> Vec<(&'static str, ModuleState)> {
        let states = self.states.read();
        self.registry
            .names()
            .into_iter()
            .map(|n| (n, states.get(n).copied().unwrap_or(ModuleState::Uninitialized)))
            .collect()
    }

    #[must_use]
    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.states.read().get(name).copied()
    }

    /// Registered deployments in registration order.
    #[must_use]
    pub fn deployments(&self) -> Vec<Arc<DeploymentRecord>> {
        self.deployments.read().clone()
    }

    /// Union of the specifications declared by all installed modules.
    #[must_use]
    pub fn supported_specifications(&self) -> BTreeSet<SpecificationId> {
        self.registry
            .modules()
            .iter()
            .flat_map(|e| e.module().provided_specifications())
            .collect()
    }
}
