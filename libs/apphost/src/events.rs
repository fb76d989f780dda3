//! In-process event bus.
//!
//! ## What it guarantees
//! - `publish` returns only after every subscribed listener saw the event (synchronous
//!   fan-out on the publisher's task).
//! - Each currently running listener gets the event exactly once.
//! - Errors and panics inside a listener are caught and reported; delivery to the other
//!   listeners continues.
//!
//! ## What it does **not** guarantee
//! - No ordering across listeners.
//! - No replay: a module subscribed after a publish never sees that event.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;

use crate::contracts::Module;
use crate::deployment::DeploymentRecord;
use crate::report::{Phase, PhaseReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    ConfigurationUpdate,
    Deployment,
    Undeployment,
    ModuleStarted,
    ModuleStopped,
}

impl EventCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventCode::ConfigurationUpdate => "CONFIGURATION_UPDATE",
            EventCode::Deployment => "DEPLOYMENT",
            EventCode::Undeployment => "UNDEPLOYMENT",
            EventCode::ModuleStarted => "MODULE_STARTED",
            EventCode::ModuleStopped => "MODULE_STOPPED",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    /// New configuration snapshot of one module.
    Configuration {
        module: String,
        value: serde_json::Value,
    },
    Deployment(Arc<DeploymentRecord>),
    Module { name: &'static str },
}

#[derive(Debug, Clone)]
pub struct Event {
    pub code: EventCode,
    pub payload: EventPayload,
}

impl Event {
    #[must_use]
    pub fn configuration_update(module: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            code: EventCode::ConfigurationUpdate,
            payload: EventPayload::Configuration {
                module: module.into(),
                value,
            },
        }
    }

    #[must_use]
    pub fn deployment(record: Arc<DeploymentRecord>) -> Self {
        Self {
            code: EventCode::Deployment,
            payload: EventPayload::Deployment(record),
        }
    }

    #[must_use]
    pub fn undeployment(record: Arc<DeploymentRecord>) -> Self {
        Self {
            code: EventCode::Undeployment,
            payload: EventPayload::Deployment(record),
        }
    }

    #[must_use]
    pub fn module_started(name: &'static str) -> Self {
        Self {
            code: EventCode::ModuleStarted,
            payload: EventPayload::Module { name },
        }
    }

    #[must_use]
    pub fn module_stopped(name: &'static str) -> Self {
        Self {
            code: EventCode::ModuleStopped,
            payload: EventPayload::Module { name },
        }
    }

    /// Configuration snapshot carried by a `CONFIGURATION_UPDATE` for `module`.
    #[must_use]
    pub fn configuration_for(&self, module: &str) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::Configuration { module: m, value } if m == module => Some(value),
            _ => None,
        }
    }
}

struct Subscriber {
    name: &'static str,
    module: Arc<dyn Module>,
}

/// Fan-out of events to running listener modules.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a running module; ignored if it is not an event listener.
    /// Returns whether the module was subscribed.
    pub(crate) fn subscribe(&self, module: Arc<dyn Module>) -> bool {
        if module.event_listener().is_none() {
            return false;
        }
        let name = module.name();
        let mut w = self.subscribers.write();
        if w.iter().any(|s| s.name == name) {
            return true;
        }
        w.push(Subscriber { name, module });
        true
    }

    pub(crate) fn unsubscribe(&self, name: &str) {
        self.subscribers.write().retain(|s| s.name != name);
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every subscribed listener.
    pub async fn publish(&self, event: Event) -> PhaseReport {
        // Snapshot so listeners may publish or (un)subscribe while we deliver.
        let snapshot: Vec<(&'static str, Arc<dyn Module>)> = self
            .subscribers
            .read()
            .iter()
            .map(|s| (s.name, s.module.clone()))
            .collect();

        let mut report = PhaseReport::new();
        tracing::debug!(code = %event.code, listeners = snapshot.len(), "publishing event");

        for (name, module) in snapshot {
            let Some(listener) = module.event_listener() else {
                continue;
            };
            match AssertUnwindSafe(listener.on_event(&event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => report.record(name, Phase::Event, err),
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_owned());
                    report.record(
                        name,
                        Phase::Event,
                        anyhow::anyhow!("listener panicked: {msg}"),
                    );
                }
            }
        }
        report
    }
}
