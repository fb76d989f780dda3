use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use file_rotate::{
    ContentLimit, FileRotate,
    compression::Compression,
    suffix::AppendCount,
};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Size-rotated log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSinkConfig {
    pub path: PathBuf,
    /// Level for the file; defaults to the console default level.
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

fn default_max_size_mb() -> u64 {
    100
}

fn default_max_backups() -> usize {
    5
}

/// Logging section of the application config (also the `logging` module's config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level: `trace`, `debug`, `info`, `warn`, `error` or `off`.
    pub level: String,
    /// Per-target overrides, e.g. `rest_module: debug`. Records logged before startup
    /// are replayed under `apphost::early`.
    pub targets: BTreeMap<String, String>,
    pub format: LogFormat,
    pub file: Option<FileSinkConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            targets: BTreeMap::new(),
            format: LogFormat::Plain,
            file: None,
        }
    }
}

/// Noisy crates capped at WARN unless configured otherwise.
const NOISY_CRATES: &[&str] = &["zip", "walkdir"];

fn parse_level(raw: &str) -> anyhow::Result<LevelFilter> {
    LevelFilter::from_str(raw.trim()).with_context(|| format!("invalid log level '{raw}'"))
}

/// Build the per-target filter for a sink with the given default level.
fn build_targets(default: LevelFilter, cfg: &LoggingConfig) -> anyhow::Result<Targets> {
    let mut targets = Targets::new().with_default(default);
    for noisy in NOISY_CRATES {
        targets = targets.with_target(*noisy, LevelFilter::WARN);
    }
    for (target, level) in &cfg.targets {
        targets = targets.with_target(target.clone(), parse_level(level)?);
    }
    Ok(targets)
}

// ================= rotating writer for files =================

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendCount>>>);

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriterHandle;
    fn make_writer(&'a self) -> Self::Writer {
        RotWriterHandle(self.0.clone())
    }
}

struct RotWriterHandle(Arc<Mutex<FileRotate<AppendCount>>>);

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| io::Error::other(format!("log file lock poisoned: {e}")))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0
            .lock()
            .map_err(|e| io::Error::other(format!("log file lock poisoned: {e}")))?
            .flush()
    }
}

fn create_rotating_writer(file: &FileSinkConfig) -> anyhow::Result<RotWriter> {
    if let Some(parent) = file.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create log directory '{}'", parent.display()))?;
    }
    let max_bytes = usize::try_from(file.max_size_mb.saturating_mul(1024 * 1024))
        .unwrap_or(usize::MAX);

    let rot = FileRotate::new(
        &file.path,
        AppendCount::new(file.max_backups),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

/// Resolve the file path against `base_dir` when relative.
#[must_use]
pub fn resolve_log_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

// ================= public init =================

/// Install the global `tracing` subscriber described by `cfg`.
///
/// `RUST_LOG`, when set, acts as an upper bound on top of the configured levels.
/// Returns `Ok(false)` if a global subscriber was already installed (a second call is
/// not an error).
///
/// # Errors
/// Invalid level strings or an unusable log file path.
pub fn init_logging(cfg: &LoggingConfig) -> anyhow::Result<bool> {
    let default_level = parse_level(&cfg.level)?;
    let console_targets = build_targets(default_level, cfg)?;

    let file_layer = match &cfg.file {
        Some(file) => {
            let level = file.level.as_deref().map_or(Ok(default_level), parse_level)?;
            let writer = create_rotating_writer(file)?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(writer)
                    .with_filter(build_targets(level, cfg)?),
            )
        }
        None => None,
    };

    let (plain, json) = match cfg.format {
        LogFormat::Plain => (
            Some(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_filter(console_targets),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_filter(console_targets),
            ),
        ),
    };

    let env: Option<EnvFilter> = EnvFilter::try_from_default_env().ok();

    let installed = Registry::default()
        .with(env)
        .with(plain)
        .with(json)
        .with(file_layer)
        .try_init()
        .is_ok();
    Ok(installed)
}
