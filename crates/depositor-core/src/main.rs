//! Depositor - session-based content deposit service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depositor_common::logging::{init_logging, LogConfig, LogLevel};
use depositor_core::{
    clock::SystemClock,
    config::ServiceConfig,
    ingest::DirectoryIngestionService,
    store::{self, ConfigurationStore},
    Configuration, LifecycleManager,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "depositor")]
#[command(author, version, about = "Session-based content deposit service")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base directory holding one subdirectory per configuration
    #[arg(long, global = true, env = "DEPOSITOR_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the lifecycle manager until interrupted
    Run,

    /// Show configuration directories and the state of their files
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Register a configuration from a properties XML file
    Register {
        /// Path to the configuration document
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config = log_config.with_level(LogLevel::Debug);
    }
    let _guard = init_logging(&log_config)?;

    let mut config = ServiceConfig::load()?;
    if let Some(base_dir) = cli.base_dir {
        config = config.with_base_dir(base_dir);
    }

    match cli.command {
        Command::Run => run(config).await,
        Command::Status { json } => status(&config, json),
        Command::Register { file } => register(config, &file),
    }
}

async fn run(config: ServiceConfig) -> Result<()> {
    config.validate()?;

    let service = Arc::new(DirectoryIngestionService::new(&config.service_root));
    let manager = LifecycleManager::start(config, service, Arc::new(SystemClock))?;

    shutdown_signal().await;
    manager.shutdown().await;

    info!("Depositor shut down gracefully");
    Ok(())
}

fn status(config: &ServiceConfig, json: bool) -> Result<()> {
    let reports = store::inspect(&config.base_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No configurations in {}", config.base_dir.display());
        return Ok(());
    }

    for report in reports {
        let id = report.configuration_id.as_deref().unwrap_or("<unreadable>");
        let marker = if report.failed_expired { " [failed expired]" } else { "" };
        println!("{} ({}){}", report.directory, id, marker);
        if let Some(problem) = report.problem {
            println!("  problem: {problem}");
        }
        for (name, state) in report.files {
            println!("  {name}: {state}");
        }
    }

    Ok(())
}

fn register(config: ServiceConfig, file: &Path) -> Result<()> {
    let xml = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let configuration = Configuration::from_xml(&xml)?;
    let id = configuration.id().to_string();

    let (store, _) = ConfigurationStore::open(&config.base_dir)?;
    let directory = store.register(configuration, chrono::Utc::now())?;

    info!(configuration_id = %id, directory = %directory.display(), "Configuration registered");
    println!("{}", directory.display());
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
