//! Exchange pipeline server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ http::request (RawExchange)
//!                                            │
//!                                            ▼
//!                     executor::WorkerPool ──▶ Executor
//!                                            │ decode (multipart / form / raw)
//!                                            ▼
//!                                       RequestContext
//!                                            │
//!                                            ▼
//!                                HandlerChain (first claim wins)
//!                                            │ single write_*
//!                                            ▼
//!     Client Response              StreamWriter ──▶ http::response
//!     ◀──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use exchange_pipeline::error::PipelineError;
use exchange_pipeline::handler::builtin::{demo_registry, DownloadRoot, UploadDir};
use exchange_pipeline::lifecycle::{signals, startup, Shutdown};
use exchange_pipeline::{HttpServer, ServiceRegistry};

#[derive(Parser, Debug)]
#[command(name = "exchange-pipeline", version, about = "HTTP exchange pipeline server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory uploaded files are persisted into
    #[arg(long, env = "PIPELINE_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Directory `act=file` downloads are served from
    #[arg(long, env = "PIPELINE_DOWNLOAD_ROOT")]
    download_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let config = startup::load(args.config.as_deref())?;
    startup::init_observability(&config)?;

    tracing::info!("exchange-pipeline v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        workers = config.workers.max_concurrent_exchanges,
        chunk_size = config.output.chunk_size,
        exchange_timeout_secs = config.timeouts.exchange_secs,
        "Configuration loaded"
    );

    let services = Arc::new(ServiceRegistry::new());
    if let Some(dir) = args.upload_dir {
        tracing::info!(path = %dir.display(), "Persisting uploads");
        services.insert(UploadDir(dir));
    }
    if let Some(root) = args.download_root {
        tracing::info!(path = %root.display(), "Serving downloads");
        services.insert(DownloadRoot(root));
    }

    let pool = startup::assemble(&config, demo_registry(), Arc::clone(&services));
    let listener = startup::bind(&config).await?;

    let shutdown = Arc::new(Shutdown::new());
    let receiver = shutdown.subscribe();
    signals::spawn_signal_listener(Arc::clone(&shutdown));

    HttpServer::new(config, pool).run(listener, receiver).await?;

    services.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}
