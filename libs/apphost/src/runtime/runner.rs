//! Process-level runner.
//!
//! Phase order: **start → deploy configured archives → wait → stop**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`, or an arbitrary
//! future.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::deployment::{DeploymentDataRetriever, DeploymentDescriptor};
use crate::registry::ModuleRegistry;
use crate::runtime::ModuleManager;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for [`run`].
pub struct RunOptions {
    /// Modules to run; `None` discovers the `inventory`-registered ones.
    pub registry: Option<ModuleRegistry>,
    /// Module configuration documents.
    pub config: Arc<dyn ConfigStore>,
    pub fast_detection: bool,
    /// Deployment data retrievers, lowest precedence first.
    pub retrievers: Vec<Arc<dyn DeploymentDataRetriever>>,
    /// Archives deployed right after start.
    pub deployments: Vec<DeploymentDescriptor>,
    pub shutdown: ShutdownOptions,
}

impl RunOptions {
    #[must_use]
    pub fn new(config: Arc<dyn ConfigStore>, shutdown: ShutdownOptions) -> Self {
        Self {
            registry: None,
            config,
            fast_detection: true,
            retrievers: Vec::new(),
            deployments: Vec::new(),
            shutdown,
        }
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM and names the signal received.
async fn termination_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                return tokio::select! {
                    res = tokio::signal::ctrl_c() => res.map(|()| "ctrl-c"),
                    _ = sigterm.recv() => Ok("SIGTERM"),
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "shutdown: no SIGTERM handler, only Ctrl+C stops the runtime");
            }
        }
    }
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}

/// Full cycle: start → deploy → wait → stop.
///
/// # Errors
/// Fails if the module graph is invalid or any module fails to start. Deployment and
/// stop failures are logged, not returned.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    // Spawn the shutdown waiter according to the chosen strategy.
    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match termination_signal().await {
                    Ok(signal) => tracing::info!(signal, "shutdown: signal received"),
                    Err(e) => {
                        tracing::error!(error = %e, "shutdown: cannot listen for Ctrl+C; stopping");
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    let registry = match opts.registry {
        Some(registry) => registry,
        None => ModuleRegistry::discover_and_build()?,
    };

    let mut builder = ModuleManager::builder(registry)
        .config_store(opts.config)
        .fast_detection(opts.fast_detection)
        .cancellation_token(cancel.child_token());
    for retriever in opts.retrievers {
        builder = builder.retriever(retriever);
    }
    let manager = builder.build();

    manager.start_modules().await?;

    for descriptor in &opts.deployments {
        match manager.deploy(descriptor).await {
            Ok(outcome) if !outcome.report.is_success() => {
                tracing::warn!(
                    deployment = %outcome.record.name,
                    report = %outcome.report,
                    "deployed with module failures"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(
                    archive = %descriptor.archive.display(),
                    error = %format!("{:#}", anyhow::Error::from(err)),
                    "deployment failed"
                );
            }
        }
    }

    cancel.cancelled().await;

    let report = manager.stop_modules().await;
    if !report.is_success() {
        tracing::warn!(%report, "modules stopped with failures");
    }
    Ok(())
}
