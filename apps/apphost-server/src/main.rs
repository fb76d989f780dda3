mod registered_modules;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use apphost::deployment::{PropertiesFileRetriever, StaticDataRetriever};
use apphost::logging::{EarlyLogBuffer, LoggingConfig, TracingSink, init_logging};
use apphost::{
    AppConfig, DeploymentDescriptor, ModuleManager, ModuleRegistry, ShutdownOptions, run,
};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tracing::Level;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const TARGET: &str = "apphost_server";

/// AppHost Server - modular application runtime
#[derive(Parser)]
#[command(name = "apphost-server")]
#[command(about = "AppHost Server - modular application runtime")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the runtime and serve until interrupted
    Run {
        /// Additional archive to deploy after start (repeatable)
        #[arg(long = "deploy", value_name = "ARCHIVE")]
        deploy: Vec<PathBuf>,
    },
    /// Validate configuration and the module graph, then exit
    Check,
    /// Deploy one archive, print its deployment record as JSON and exit
    Inspect {
        archive: PathBuf,
        /// Context root override
        #[arg(long)]
        context_root: Option<String>,
        /// Extra deployment data, `key=value` (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_owned(), value.to_owned()))
}

fn level_override(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layered config: defaults -> YAML (if provided) -> env (APPHOST__*) -> CLI overrides
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(level) = level_override(cli.verbose) {
        level.clone_into(&mut config.logging.level);
    }

    // Buffered until the logging module has installed the subscriber.
    let early = EarlyLogBuffer::global();
    early.log(
        Level::INFO,
        TARGET,
        cli.config.as_ref().map_or_else(
            || "configuration loaded from defaults and environment".to_owned(),
            |path| format!("configuration loaded from {}", path.display()),
        ),
    );

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let result = match cli.command.unwrap_or(Commands::Run { deploy: Vec::new() }) {
        Commands::Run { deploy } => run_server(&config, deploy).await,
        Commands::Check => check_config(&config),
        Commands::Inspect {
            archive,
            context_root,
            set,
        } => inspect(&config, archive, context_root, set).await,
    };
    if result.is_err() {
        flush_early_logs(&early);
    }
    result
}

/// Startup failed before the logging module took over the buffer: replay it through a
/// default stderr subscriber so those records are not lost.
fn flush_early_logs(early: &EarlyLogBuffer) {
    if early.is_attached() {
        return;
    }
    if let Err(err) = init_logging(&LoggingConfig::default()) {
        eprintln!("warning: cannot install fallback logging: {err:#}");
    }
    early.drain_into(Arc::new(TracingSink));
}

fn check_config(config: &AppConfig) -> Result<()> {
    let registry = ModuleRegistry::discover_and_build().context("invalid module graph")?;
    let known = registry.names();
    println!("Configuration is valid");
    println!("modules (start order): {}", known.join(", "));
    for name in config.module_names() {
        if !known.iter().any(|k| *k == name) {
            eprintln!("warning: configuration for unknown module '{name}'");
        }
    }
    Ok(())
}

async fn run_server(config: &AppConfig, deploy: Vec<PathBuf>) -> Result<()> {
    let mut opts = config.run_options(ShutdownOptions::Signals)?;
    opts.deployments
        .extend(deploy.into_iter().map(DeploymentDescriptor::new));
    run(opts).await
}

async fn inspect(
    config: &AppConfig,
    archive: PathBuf,
    context_root: Option<String>,
    set: Vec<(String, String)>,
) -> Result<()> {
    let registry = ModuleRegistry::discover_and_build()?;
    let manager = ModuleManager::builder(registry)
        .config_store(Arc::new(config.config_store()?))
        .fast_detection(config.sniffing.fast_detection)
        .retriever(Arc::new(PropertiesFileRetriever))
        .retriever(Arc::new(StaticDataRetriever::new(
            set.into_iter().collect::<BTreeMap<_, _>>(),
        )))
        .build();
    manager.start_modules().await?;

    let mut descriptor = DeploymentDescriptor::new(archive);
    if let Some(root) = context_root {
        descriptor = descriptor.with_context_root(root);
    }

    let deployed = manager.deploy(&descriptor).await;
    let printed = match deployed {
        Ok(outcome) => {
            if !outcome.report.is_success() {
                tracing::warn!(report = %outcome.report, "deployed with module failures");
            }
            serde_json::to_string_pretty(outcome.record.as_ref())
                .map_err(anyhow::Error::from)
                .map(|json| println!("{json}"))
        }
        Err(err) => Err(anyhow::Error::from(err)
            .context(format!("cannot deploy '{}'", descriptor.archive.display()))),
    };

    let report = manager.stop_modules().await;
    if !report.is_success() {
        tracing::warn!(%report, "modules stopped with failures");
    }
    printed
}
