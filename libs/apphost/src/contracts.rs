use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ModuleCtx;
use crate::deployment::DeploymentRecord;
use crate::events::Event;
use crate::runtime_objects::{ExposedObject, TypeKey};
use crate::sniffer::{Sniffer, SpecificationId};

/// A pluggable unit of runtime functionality.
///
/// Lifecycle as driven by the `ModuleManager`, in dependency order:
/// `configure` → `start` → (runtime objects registered, listener subscribed) → … → `stop`.
///
/// Optional capabilities are surfaced through the `deployment_aware` / `event_listener`
/// accessors; modules that implement them return `Some(self)`.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Unique module name; dependencies refer to modules by this name.
    fn name(&self) -> &'static str;

    /// Names of modules that must be running before this one starts.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Specifications this module implements (informational; sniffers report actual hits).
    fn provided_specifications(&self) -> Vec<SpecificationId> {
        Vec::new()
    }

    /// Fresh sniffer instance for one archive scan.
    fn sniffer(&self) -> Option<Box<dyn Sniffer>> {
        None
    }

    /// Capability types this module publishes. Checked for clashes before anything starts.
    fn exposed_types(&self) -> Vec<TypeKey> {
        Vec::new()
    }

    /// Objects for the declared capability types; collected right after `start` succeeded.
    fn runtime_objects(&self) -> Vec<ExposedObject> {
        Vec::new()
    }

    /// Configuration injection. Runs before `start`; load typed config via `ctx.config()`.
    async fn configure(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Start entry point. Must return once the module is usable; spawn background work
    /// on `ctx.cancellation_token()` instead of blocking here.
    async fn start(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn deployment_aware(&self) -> Option<&dyn DeploymentAware> {
        None
    }

    fn event_listener(&self) -> Option<&dyn EventListener> {
        None
    }
}

/// Modules that want to see deployments.
#[async_trait]
pub trait DeploymentAware: Send + Sync {
    async fn register_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()>;

    async fn unregister_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()>;
}

/// Modules that react to bus events. Must not block indefinitely: delivery is synchronous
/// with the publisher.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &Event) -> anyhow::Result<()>;
}
