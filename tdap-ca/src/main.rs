//! tdap-ca - Content Analysis Service
//!
//! Runs the document analysis pipeline: extraction, AI summarization and
//! evaluation, pairwise disagreement analysis, and topic consensus tracking.
//! Jobs execute through a durable SQLite queue, degrading to an in-process
//! executor when the queue is unavailable.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tdap_ca::config::{QueueStrategy, ServiceConfig};
use tdap_ca::dispatch::{
    DurableQueueDispatcher, DurableQueueWorker, InProcessDispatcher, InProcessWorker,
    JobDispatcher, JobRunner, RetryPolicy,
};
use tdap_ca::services::HttpTextService;
use tdap_common::events::EventBus;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tdap-ca (Content Analysis) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder (CLI arg -> env -> config -> default)
    let cli_root = std::env::args().nth(1);
    let root_folder = tdap_common::config::resolve_root_folder(cli_root.as_deref(), "TDAP_ROOT_FOLDER");
    tdap_common::config::ensure_root_folder(&root_folder)?;
    info!("Root folder: {}", root_folder.display());

    // Step 2: Load service configuration
    let config = ServiceConfig::load(&root_folder.join("tdap-ca.toml"))?;

    // Step 3: Open or create database
    let db_path = root_folder.join("tdap.db");
    info!("Database: {}", db_path.display());
    let db = tdap_common::db::init_database(&db_path).await?;

    // Event bus for in-process observers
    let events = EventBus::new(100);

    // AI text service
    let ai = Arc::new(HttpTextService::new(&config.ai)?);

    let policy = RetryPolicy::new(
        config.pipeline.max_attempts,
        Duration::from_millis(config.pipeline.retry_base_ms),
    );
    let cancel = CancellationToken::new();

    // Select the queue strategy; durable unless configured off or broken
    let use_durable = match config.queue.strategy {
        QueueStrategy::Durable => match DurableQueueDispatcher::verify(&db).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Durable queue unavailable, degrading to in-process execution");
                false
            }
        },
        QueueStrategy::InProcess => false,
    };

    let worker_handle = if use_durable {
        let dispatcher: Arc<dyn JobDispatcher> = Arc::new(DurableQueueDispatcher::new(db.clone()));
        let runner = Arc::new(JobRunner::new(
            db.clone(),
            events.clone(),
            ai,
            dispatcher,
            &config,
        ));
        let worker = DurableQueueWorker::new(
            db.clone(),
            runner,
            policy,
            Duration::from_millis(config.queue.poll_interval_ms),
        );
        info!("Job dispatch: durable queue");
        tokio::spawn(worker.run(cancel.clone()))
    } else {
        let (dispatcher, rx) = InProcessDispatcher::new();
        let dispatcher: Arc<dyn JobDispatcher> = Arc::new(dispatcher);
        let runner = Arc::new(JobRunner::new(
            db.clone(),
            events.clone(),
            ai,
            dispatcher,
            &config,
        ));
        let worker = InProcessWorker::new(rx, runner, policy);
        info!("Job dispatch: in-process executor");
        tokio::spawn(worker.run(cancel.clone()))
    };

    info!("Pipeline ready");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    cancel.cancel();
    let _ = worker_handle.await;

    info!("tdap-ca stopped");
    Ok(())
}
