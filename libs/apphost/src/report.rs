//! Outcome of best-effort operations that visit many modules.
//!
//! Stop, deployment (un)registration and event delivery keep going when one module
//! fails; the failures are collected here instead of being propagated.

use std::fmt;

/// Lifecycle step in which a module failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Configure,
    Start,
    Expose,
    Stop,
    RegisterDeployment,
    UnregisterDeployment,
    Event,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Configure => "configure",
            Phase::Start => "start",
            Phase::Expose => "expose",
            Phase::Stop => "stop",
            Phase::RegisterDeployment => "register_deployment",
            Phase::UnregisterDeployment => "unregister_deployment",
            Phase::Event => "event",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ModuleFailure {
    pub module: &'static str,
    pub phase: Phase,
    pub error: anyhow::Error,
}

impl fmt::Display for ModuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}: {:#}", self.module, self.phase, self.error)
    }
}

/// Aggregate result: success flag is "no failures recorded".
#[derive(Debug, Default)]
#[must_use]
pub struct PhaseReport {
    failures: Vec<ModuleFailure>,
}

impl PhaseReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, module: &'static str, phase: Phase, error: anyhow::Error) {
        tracing::warn!(module, phase = phase.as_str(), error = %format!("{error:#}"), "module call failed; continuing");
        self.failures.push(ModuleFailure {
            module,
            phase,
            error,
        });
    }

    pub fn merge(&mut self, other: PhaseReport) {
        self.failures.extend(other.failures);
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> &[ModuleFailure] {
        &self.failures
    }

    /// Names of the modules that failed, in the order they were visited.
    #[must_use]
    pub fn failed_modules(&self) -> Vec<&'static str> {
        self.failures.iter().map(|f| f.module).collect()
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("ok");
        }
        write!(f, "{} failure(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}
