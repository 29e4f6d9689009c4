//! hostbackup - Main entry point
//!
//! Selects files on this host and streams them to the backup authority, or
//! reports on backups the authority holds.

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostbackup::fs::attributes::SystemAttributes;
use hostbackup::transport::{self, privilege};
use hostbackup::{
    utils, AgentError, BackupJob, Config, InfoQuery, InspectionEngine, SelectionResolver,
    TextReport, TransferEngine,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select files and send them to the authority as a new backup
    Backup {
        /// Backup name (overrides config)
        #[arg(short, long)]
        name: Option<String>,

        /// Schedule (overrides config)
        #[arg(short = 'r', long)]
        schedule: Option<String>,
    },

    /// Show file counts, size and completeness of stored backups
    Info {
        /// Backup name
        #[arg(short, long)]
        name: Option<String>,

        /// Backup identifier; takes precedence over the name
        #[arg(short, long)]
        date: Option<i64>,
    },

    /// Install the operator's SSH key on the authority host
    CopyId,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref());
    let level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.log.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    if let Err(e) = utils::logger::init(&level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let outcome = config
        .map_err(anyhow::Error::from)
        .and_then(|config| run(args.command, config));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<AgentError>() {
                Some(AgentError::Rejected(message)) => println!("Server error: {}", message),
                _ => error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: Config) -> Result<()> {
    // Credentials change before any runtime threads exist.
    privilege::switch_for(&config.server)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match command {
        Command::Backup { name, schedule } => {
            let job = BackupJob {
                name: name.unwrap_or_else(|| config.backup.name.clone()),
                schedule: schedule.unwrap_or_else(|| config.backup.schedule.clone()),
            };
            runtime.block_on(backup(job, &config))
        }
        Command::Info { name, date } => {
            let query = match (date.filter(|d| *d != 0), name) {
                (Some(date), _) => InfoQuery::Date(date),
                (None, Some(name)) => InfoQuery::Name(name),
                (None, None) => InfoQuery::Name(config.backup.name.clone()),
            };
            runtime.block_on(inspect(query, &config))
        }
        Command::CopyId => {
            runtime.block_on(transport::copy_id(&config.server))?;
            Ok(())
        }
    }
}

async fn backup(job: BackupJob, config: &Config) -> Result<()> {
    info!(
        "Starting hostbackup v{} (name: {}, schedule: {})",
        env!("CARGO_PKG_VERSION"),
        job.name,
        job.schedule
    );

    let selection = config.selection.clone();
    let set = tokio::task::spawn_blocking(move || SelectionResolver::resolve_config(&selection)).await?;
    if set.is_empty() {
        warn!("Nothing selected for backup");
    }

    let engine = TransferEngine::new(
        transport::from_config(&config.server)?,
        Arc::new(SystemAttributes),
    );
    engine.run(&job, &set).await?;
    Ok(())
}

async fn inspect(query: InfoQuery, config: &Config) -> Result<()> {
    let engine = InspectionEngine::new(transport::from_config(&config.server)?);
    engine
        .inspect(&query, TextReport::new(std::io::stdout()))
        .await?;
    Ok(())
}
