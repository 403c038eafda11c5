//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and metrics
//! - Assemble executor and worker pool from a handler registry
//! - Bind the listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::loader::load_config;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::executor::{Executor, ServiceRegistry, WorkerPool};
use crate::handler::HandlerRegistry;
use crate::observability::{logging, metrics};

/// Load the configuration file, or fall back to defaults when `path` is `None`.
pub fn load(path: Option<&Path>) -> Result<PipelineConfig, PipelineError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

/// Install the tracing subscriber and, when enabled, the metrics exporter.
pub fn init_observability(config: &PipelineConfig) -> Result<(), PipelineError> {
    logging::init_logging(&config.observability);
    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }
    Ok(())
}

/// Build the executor and the worker pool that runs it.
pub fn assemble(
    config: &PipelineConfig,
    handlers: HandlerRegistry,
    services: Arc<ServiceRegistry>,
) -> Arc<WorkerPool> {
    let executor = Arc::new(Executor::new(handlers, services, config));
    tracing::info!(
        handlers = executor.handler_count(),
        services = executor.services().len(),
        workers = config.workers.max_concurrent_exchanges,
        "Pipeline assembled"
    );
    Arc::new(WorkerPool::new(executor, &config.workers))
}

/// Bind the configured listener address.
pub async fn bind(config: &PipelineConfig) -> Result<TcpListener, PipelineError> {
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        max_connections = config.listener.max_connections,
        "Listening for connections"
    );
    Ok(listener)
}
