mod config;
mod core;
mod interfaces;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::core::agents::AgentLifecycle;
use crate::core::prompt::DefaultPromptBuilder;
use crate::core::queue::QueueProcessor;
use crate::core::router::EventRouter;
use crate::core::sandbox::{DockerCliDriver, HostProcessDriver};
use crate::core::service::ServiceManager;
use crate::core::spool::EventSpool;
use crate::core::store::Store;
use crate::core::workers::{LifecycleWorker, QueueWorker, RouterWorker};
use crate::interfaces::web::ApiServer;

#[tokio::main]
async fn main() {
    let log_tx = logging::init();
    if let Err(e) = run(log_tx).await {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run(log_tx: tokio::sync::broadcast::Sender<String>) -> Result<()> {
    let config = Arc::new(EngineConfig::from_env());
    info!(
        port = config.port,
        multi_agent_events = config.multi_agent_events,
        "vibeflow starting"
    );

    let store = Store::open(&config.database_path).context("open store")?;
    let spool = EventSpool::open(&config.event_dir).context("open event spool")?;

    let lifecycle = AgentLifecycle::new(
        config.clone(),
        store.clone(),
        Arc::new(DockerCliDriver::new()),
        Arc::new(HostProcessDriver::new()),
        Arc::new(DefaultPromptBuilder),
    );
    let router = EventRouter::new(
        store.clone(),
        spool.clone(),
        lifecycle.clone(),
        config.processed_lru_capacity,
    );
    let processor = QueueProcessor::new(
        config.clone(),
        store.clone(),
        spool.clone(),
        lifecycle.clone(),
    );

    let mut manager = ServiceManager::new();
    manager.attach(Arc::new(Mutex::new(LifecycleWorker::new(
        lifecycle.clone(),
        config.log_flush_interval,
    ))));
    manager.attach(Arc::new(Mutex::new(RouterWorker::new(
        router,
        config.router_poll_interval,
    ))));
    if config.queue_processor_enabled {
        manager.attach(Arc::new(Mutex::new(QueueWorker::new(
            processor,
            config.queue_poll_interval,
        ))));
    } else {
        info!("queue processor disabled");
    }
    manager.attach(Arc::new(Mutex::new(ApiServer::new(
        config.clone(),
        store,
        spool,
        lifecycle,
        log_tx,
    ))));

    manager.start().await.context("service start")?;
    info!("vibeflow ready");

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");
    manager.shutdown().await;
    Ok(())
}
