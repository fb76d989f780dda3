//! Buffer for log records produced before the logging module has installed the real
//! subscriber.
//!
//! The buffer is either *buffering* (records are kept) or *attached* (records go straight
//! to a sink). `drain_into` replays the backlog and switches to attached while holding
//! the same lock that `log` takes, so a record offered concurrently with the drain ends
//! up either in the replay or forwarded afterwards: never lost, never duplicated, and
//! never ahead of older buffered records.

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::Level;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Final destination of early records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Target of every record re-emitted by [`TracingSink`]. `tracing` targets are static,
/// so per-target filters select replayed records by this name; the target they were
/// logged under travels in the `origin` field.
pub const EARLY_TARGET: &str = "apphost::early";

/// Re-emits records through `tracing` under [`EARLY_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) {
        let origin = record.target.as_str();
        let message = record.message.as_str();
        match record.level {
            Level::ERROR => tracing::error!(target: EARLY_TARGET, origin, "{message}"),
            Level::WARN => tracing::warn!(target: EARLY_TARGET, origin, "{message}"),
            Level::INFO => tracing::info!(target: EARLY_TARGET, origin, "{message}"),
            Level::DEBUG => tracing::debug!(target: EARLY_TARGET, origin, "{message}"),
            Level::TRACE => tracing::trace!(target: EARLY_TARGET, origin, "{message}"),
        }
    }
}

enum State {
    Buffering(Vec<LogRecord>),
    Attached(Arc<dyn LogSink>),
}

pub struct EarlyLogBuffer {
    state: Mutex<State>,
}

static GLOBAL: LazyLock<Arc<EarlyLogBuffer>> = LazyLock::new(|| Arc::new(EarlyLogBuffer::new()));

impl Default for EarlyLogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EarlyLogBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Buffering(Vec::new())),
        }
    }

    /// The process-wide buffer used by the host binary and the `logging` module.
    #[must_use]
    pub fn global() -> Arc<EarlyLogBuffer> {
        GLOBAL.clone()
    }

    pub fn log(&self, level: Level, target: impl Into<String>, message: impl Into<String>) {
        let record = LogRecord {
            level,
            target: target.into(),
            message: message.into(),
        };
        let sink = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Buffering(records) => {
                    records.push(record);
                    return;
                }
                State::Attached(sink) => sink.clone(),
            }
        };
        // Attached: the backlog was fully replayed before the state switched.
        sink.emit(&record);
    }

    /// Replay the backlog into `sink` and forward every later record to it.
    /// Returns the number of replayed records. Draining again only swaps the sink.
    pub fn drain_into(&self, sink: Arc<dyn LogSink>) -> usize {
        let mut state = self.state.lock();
        let replayed = match &mut *state {
            State::Buffering(records) => {
                for record in records.iter() {
                    sink.emit(record);
                }
                records.len()
            }
            State::Attached(_) => 0,
        };
        *state = State::Attached(sink);
        replayed
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        matches!(*self.state.lock(), State::Attached(_))
    }

    /// Records waiting for a sink.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            State::Buffering(records) => records.len(),
            State::Attached(_) => 0,
        }
    }
}
