//! Worker daemon: drains the translation queue of a yuedu database.
//!
//! Usage: `yuedu-worker [config.json]`. Without a config file the defaults
//! apply, which still require `provider.dictionary_path`.
//!
//! The progress bus is in-memory and nothing in this process subscribes to
//! it, so the daemon only persists progress and collects the bus. Live
//! streams are served by a process that embeds the library and runs its
//! pool next to a `TranslationService`. Other processes see the daemon's
//! work through the store.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;

use yuedu::config::{load_config, Config};
use yuedu::error::{ConfigError, WorkerError};
use yuedu::worker::{BusProgress, JobRunner, WorkerPool};
use yuedu::{Database, DictionaryTranslator, JobStore, LeaseManager, ProgressBus};

fn init_logging() {
    // Routes `log` records from the storage layer through tracing.
    tracing_log::LogTracer::init().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> yuedu::Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => load_config(PathBuf::from(path))?,
        None => Config::default(),
    };

    info!("Starting yuedu worker v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config
        .resolved_database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and no home directory was found".to_string(),
        })?;
    let db = Database::open(&db_path)?;

    let dictionary_path =
        config
            .provider
            .dictionary_path
            .as_ref()
            .ok_or_else(|| ConfigError::Validation {
                message: "provider.dictionary_path is required".to_string(),
            })?;
    let translator = DictionaryTranslator::from_path(dictionary_path)?;

    let store = JobStore::new(db.clone());
    let leases = LeaseManager::new(db, config.worker.max_attempts);
    let bus = ProgressBus::new(config.stream.bus_settings());

    let runner = Arc::new(JobRunner::new(
        store,
        leases.clone(),
        Arc::new(translator),
        Arc::new(BusProgress::new(bus.clone())),
        config.worker.runner_settings(),
    ));
    let pool = WorkerPool::start(runner, leases, config.worker.pool_settings())?;

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        signal.notify_one();
    })
    .map_err(|e| WorkerError::SpawnFailed(format!("signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .map_err(|e| WorkerError::SpawnFailed(format!("runtime: {}", e)))?;
    runtime.block_on(bus.run_gc(config.stream.gc_interval(), shutdown.notified()));

    pool.shutdown();
    pool.wait();
    Ok(())
}
