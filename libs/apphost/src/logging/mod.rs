//! Logging bootstrap: subscriber installation and the early-log buffer.

mod early;
mod init;

pub use early::{EARLY_TARGET, EarlyLogBuffer, LogRecord, LogSink, TracingSink};
pub use init::{FileSinkConfig, LogFormat, LoggingConfig, init_logging, resolve_log_path};
