//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all pipeline handler
//! - Wire up middleware (tracing, body limit, request ID, concurrency limit)
//! - Bridge each request into a [`RawExchange`] and submit it to the pool
//! - Wait for the response head and stream the body back
//! - Enforce head-wait and whole-exchange timeouts
//! - Graceful shutdown: stop accepting, finish responses, drain workers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::config::PipelineConfig;
use crate::context::{ExchangePhase, ExchangeState, HostExchange};
use crate::executor::WorkerPool;
use crate::http::request::{into_exchange, DEFAULT_BODY_CAPACITY};
use crate::http::response::{streaming_body, AxumHost};

/// How long shutdown waits for in-flight exchanges to finish.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub channel_capacity: usize,
    pub body_capacity: usize,
    pub head_wait: Option<Duration>,
    pub exchange_timeout: Option<Duration>,
}

/// HTTP front end for the exchange pipeline.
pub struct HttpServer {
    router: Router,
    config: PipelineConfig,
    pool: Arc<WorkerPool>,
}

impl HttpServer {
    /// Create a new HTTP server submitting exchanges to `pool`.
    pub fn new(config: PipelineConfig, pool: Arc<WorkerPool>) -> Self {
        let state = AppState {
            pool: Arc::clone(&pool),
            channel_capacity: config.output.channel_capacity,
            body_capacity: DEFAULT_BODY_CAPACITY,
            head_wait: config.timeouts.head_wait(),
            exchange_timeout: config.timeouts.exchange_timeout(),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            pool,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &PipelineConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/{*path}", any(pipeline_handler))
            .route("/", any(pipeline_handler))
            .with_state(state);

        let router = match body_limit(config) {
            Some(limit) => router.layer(RequestBodyLimitLayer::new(limit)),
            None => router,
        };

        router
            .layer(SetResponseHeaderLayer::if_not_present(
                header::SERVER,
                HeaderValue::from_static("exchange-pipeline"),
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(ConcurrencyLimitLayer::new(
                config.listener.max_connections.max(1),
            ))
    }

    /// Run the server until `shutdown` fires, then drain the worker pool.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            workers = self.pool.capacity(),
            "HTTP server starting"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, no longer accepting exchanges");
            })
            .await?;

        let drained = self.pool.drain(DRAIN_DEADLINE).await;
        tracing::info!(drained, "HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

/// Body limit enforced at the transport. `None` when uploads are unlimited.
fn body_limit(config: &PipelineConfig) -> Option<usize> {
    match config.upload.max_request_size {
        0 => None,
        limit => {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            Some(limit.max(config.security.max_body_size))
        }
    }
}

/// Catch-all handler: every request becomes one pipeline exchange.
async fn pipeline_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let exchange = Arc::new(ExchangeState::new());
    let (host, receivers) = AxumHost::new(state.channel_capacity, Handle::current());

    tracing::debug!(
        exchange_id = %exchange.id(),
        method = %request.method(),
        path = %request.uri().path(),
        "Exchange received"
    );

    let raw = into_exchange(
        request,
        Arc::clone(&host) as Arc<dyn HostExchange>,
        Arc::clone(&exchange),
        state.body_capacity,
    );

    if let Err(e) = state.pool.submit(raw).await {
        abort(&exchange, &host, "exchange rejected by worker pool");
        return failure(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
    }

    match state.exchange_timeout {
        Some(limit) => {
            tokio::spawn(watchdog(
                limit,
                Arc::clone(&exchange),
                Arc::clone(&host),
                receivers.done,
            ));
        }
        None => drop(receivers.done),
    }

    let head = match state.head_wait {
        Some(limit) => match tokio::time::timeout(limit, receivers.head).await {
            Ok(head) => head,
            Err(_) => {
                abort(&exchange, &host, "no response head within head-wait timeout");
                return failure(StatusCode::GATEWAY_TIMEOUT, "exchange timed out");
            }
        },
        None => receivers.head.await,
    };

    match head {
        Ok(head) => {
            let mut response = Response::new(streaming_body(receivers.body));
            *response.status_mut() = head.status;
            *response.headers_mut() = head.headers;
            response
        }
        Err(_) => match exchange.phase() {
            // Completed without producing output.
            ExchangePhase::Completed => StatusCode::OK.into_response(),
            ExchangePhase::Aborted => {
                failure(StatusCode::SERVICE_UNAVAILABLE, "exchange aborted")
            }
            ExchangePhase::Processing => {
                failure(StatusCode::INTERNAL_SERVER_ERROR, "exchange ended without a response")
            }
        },
    }
}

/// Abort the exchange after `limit` unless it reaches a terminal phase first.
async fn watchdog(
    limit: Duration,
    exchange: Arc<ExchangeState>,
    host: Arc<AxumHost>,
    done: oneshot::Receiver<ExchangePhase>,
) {
    tokio::select! {
        _ = done => {}
        _ = tokio::time::sleep(limit) => {
            abort(&exchange, &host, "exchange timeout elapsed");
        }
    }
}

fn abort(exchange: &ExchangeState, host: &AxumHost, reason: &str) {
    if exchange.abort() {
        tracing::warn!(exchange_id = %exchange.id(), reason, "Exchange aborted");
        host.on_complete(ExchangePhase::Aborted);
    }
}

/// Host-level failure body, shaped like the pipeline's own fallbacks.
fn failure(status: StatusCode, msg: &str) -> Response {
    let body = json!({
        "status": "fail",
        "error_code": status.as_str(),
        "msg": msg,
    });
    (status, Json(body)).into_response()
}
