use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::middleware;
use axum::routing::{get, MethodRouter};
use axum::Router;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::auth::auth_middleware;
use crate::api::handlers::{
    describe_handler, generate_handler, health_handler, method_not_allowed_handler,
};
use crate::config::GatewaySettings;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::generators::{default_generators, GeneratorError};
use crate::poller::CancelSignal;
use crate::registry::default_registry;

pub const SERVICE_NAME: &str = "imagegen-gateway";

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub auth_dev_bypass: bool,
    pub api_key: Option<Arc<str>>,
    pub dispatcher: Arc<Dispatcher>,
    /// Flips to `true` when the server starts shutting down.
    pub shutdown: CancelSignal,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        api_key: Option<&str>,
        auth_dev_bypass: bool,
        shutdown: CancelSignal,
    ) -> Self {
        Self {
            service_name: SERVICE_NAME,
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            auth_dev_bypass,
            api_key: api_key.filter(|k| !k.trim().is_empty()).map(Arc::from),
            dispatcher,
            shutdown,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to build generators: {0}")]
    Generators(#[from] GeneratorError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("server i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The gateway endpoint is mounted at `/` and `/api`; `/health` skips auth.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", gateway_routes(&state))
        .route("/api", gateway_routes(&state))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn gateway_routes(state: &AppState) -> MethodRouter<AppState> {
    get(describe_handler)
        .post(generate_handler)
        .fallback(method_not_allowed_handler)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
}

/// Builds the dispatcher from the shipped registry and generator table.
pub fn default_dispatcher(settings: &GatewaySettings) -> Result<Dispatcher, ServeError> {
    let generators = default_generators(settings)?;
    Ok(Dispatcher::new(default_registry(), generators)?)
}

pub async fn serve(settings: GatewaySettings) -> Result<(), ServeError> {
    let dispatcher = Arc::new(default_dispatcher(&settings)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(
        dispatcher.clone(),
        settings.api_key.as_deref(),
        settings.auth_dev_bypass,
        shutdown_rx,
    );
    if state.auth_dev_bypass {
        warn!("auth dev bypass is enabled; requests are not authenticated");
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    info!(
        bind = %settings.bind,
        methods = dispatcher.registry().len(),
        "starting imagegen-gateway HTTP surface"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;
    info!("imagegen-gateway stopped");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    } else {
        info!("ctrl-c received; draining in-flight requests");
    }
    let _ = shutdown_tx.send(true);
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
