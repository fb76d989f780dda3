use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ModuleCtx;
use crate::contracts::Module;
use crate::logging::{EarlyLogBuffer, LoggingConfig, TracingSink, init_logging};
use crate::registry::{Registrator, RegistryBuilder};

/// Installs the process subscriber from its `config` section and flushes the early-log
/// buffer into it. Every other shipped module depends on it, so it starts first.
pub struct LoggingModule {
    buffer: Arc<EarlyLogBuffer>,
    install_subscriber: bool,
}

impl Default for LoggingModule {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingModule {
    pub const NAME: &'static str = "logging";

    /// Module draining the process-wide buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(EarlyLogBuffer::global())
    }

    #[must_use]
    pub fn with_buffer(buffer: Arc<EarlyLogBuffer>) -> Self {
        Self {
            buffer,
            install_subscriber: true,
        }
    }

    /// Leave the global subscriber alone (it is already owned by the caller, e.g. a test
    /// harness); the module then only drains the buffer.
    #[must_use]
    pub fn without_subscriber(mut self) -> Self {
        self.install_subscriber = false;
        self
    }
}

#[async_trait]
impl Module for LoggingModule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn start(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: LoggingConfig = ctx.config()?;
        if self.install_subscriber && !init_logging(&cfg)? {
            tracing::debug!("global subscriber already installed; keeping it");
        }
        let replayed = self.buffer.drain_into(Arc::new(TracingSink));
        tracing::info!(level = %cfg.level, replayed, "logging configured");
        Ok(())
    }
}

fn register(builder: &mut RegistryBuilder) {
    builder.register(Arc::new(LoggingModule::new()));
}

inventory::submit! { Registrator(register) }

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, InMemoryConfigStore};
    use crate::context::ModuleContextBuilder;
    use crate::events::EventBus;
    use crate::runtime_objects::RuntimeObjects;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tracing::Level;

    fn ctx(store: InMemoryConfigStore) -> ModuleCtx {
        ModuleContextBuilder::new(
            Arc::new(store),
            Arc::new(RuntimeObjects::new()),
            Arc::new(EventBus::new()),
            CancellationToken::new(),
        )
        .for_module(LoggingModule::NAME)
    }

    #[tokio::test]
    async fn start_drains_the_buffer() {
        let buffer = Arc::new(EarlyLogBuffer::new());
        buffer.log(Level::INFO, "boot", "before logging");
        let module = LoggingModule::with_buffer(buffer.clone()).without_subscriber();

        module.start(&ctx(InMemoryConfigStore::new())).await.unwrap();

        assert!(buffer.is_attached());
        assert_eq!(buffer.pending(), 0);
    }

    #[tokio::test]
    async fn invalid_config_fails_start_and_keeps_buffering() {
        let store = InMemoryConfigStore::new();
        store.set(LoggingModule::NAME, json!({ "config": { "format": "xml" } }));
        let buffer = Arc::new(EarlyLogBuffer::new());
        buffer.log(Level::WARN, "boot", "kept");
        let module = LoggingModule::with_buffer(buffer.clone()).without_subscriber();

        assert!(module.start(&ctx(store)).await.is_err());
        assert!(!buffer.is_attached());
        assert_eq!(buffer.pending(), 1);
    }
}
