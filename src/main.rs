use chrono::Utc;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use regpay::application::engine::RegistrationEngine;
use regpay::config::EngineConfig;
use regpay::domain::ports::Stores;
use regpay::infrastructure::clock::ManualClock;
use regpay::infrastructure::in_memory::in_memory_stores_with_timeout;
use regpay::infrastructure::notifier::TracingNotifier;
use regpay::interfaces::csv::program_reader::ProgramReader;
use regpay::interfaces::csv::registration_writer::RegistrationWriter;
use regpay::interfaces::replay::{ReplayReader, Replayer};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Replay commands, one JSON object per line
    input: PathBuf,

    /// Program table CSV: competition_id,program,fee,max_participants
    #[arg(long)]
    programs: PathBuf,

    /// Engine configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shared secret for signing gateway payloads
    #[arg(long, env = "REGPAY_GATEWAY_SECRET", hide_env_values = true)]
    gateway_secret: Option<String>,

    /// Minutes an unpaid order holds its capacity
    #[arg(long, env = "REGPAY_ORDER_TTL_MINUTES")]
    order_ttl_minutes: Option<i64>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn open_stores(db_path: Option<PathBuf>, config: &EngineConfig) -> Result<Stores> {
    let lock_timeout = config.capacity_lock_timeout();
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            regpay::infrastructure::rocksdb::rocksdb_stores(path, lock_timeout).into_diagnostic()
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
            Ok(in_memory_stores_with_timeout(lock_timeout))
        }
        None => Ok(in_memory_stores_with_timeout(lock_timeout)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    if let Some(secret) = cli.gateway_secret {
        config.gateway_secret = secret;
    }
    if let Some(minutes) = cli.order_ttl_minutes {
        config.order_ttl_minutes = minutes;
    }

    let schedules = ProgramReader::new(File::open(&cli.programs).into_diagnostic()?)
        .schedules()
        .into_diagnostic()?;

    let stores = open_stores(cli.db_path, &config)?;
    let clock = ManualClock::new(Utc::now());
    let engine = RegistrationEngine::new(
        stores,
        config,
        Arc::new(clock.clone()),
        Arc::new(TracingNotifier),
    )
    .into_diagnostic()?;
    let replayer = Replayer::new(Arc::new(engine), clock, schedules);

    // Replay commands
    let file = File::open(cli.input).into_diagnostic()?;
    for command in ReplayReader::new(file).commands() {
        match command {
            Ok(command) => {
                if let Err(e) = replayer.apply(command).await {
                    tracing::warn!(error = %e, "command failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "unreadable command skipped");
            }
        }
    }

    // Output final state
    let report = replayer.engine().registration_report().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = RegistrationWriter::new(stdout.lock());
    writer.write_report(&report).into_diagnostic()?;

    Ok(())
}
