//! Webhook gateway: axum router, shared state and graceful shutdown

use crate::webhooks::{list_events, tracker_webhook};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use listbridge_core::BridgeConfig;
use listbridge_sync::ChangeRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const TRACKER_WEBHOOK_PATH: &str = "/asana-webhook";
pub const LIST_EVENTS_PATH: &str = "/slack-events";

pub struct GatewayState {
    router: Arc<ChangeRouter>,
    /// Secret from configuration; never replaced at runtime.
    configured_tracker_secret: Option<String>,
    /// Secret learned from the most recent handshake.
    adopted_tracker_secret: RwLock<Option<String>>,
    signing_secret: Option<String>,
    deliveries: TaskTracker,
    started_at: Instant,
}

impl GatewayState {
    pub fn new(router: Arc<ChangeRouter>) -> Self {
        Self {
            router,
            configured_tracker_secret: None,
            adopted_tracker_secret: RwLock::new(None),
            signing_secret: None,
            deliveries: TaskTracker::new(),
            started_at: Instant::now(),
        }
    }

    pub fn with_tracker_secret(mut self, secret: Option<String>) -> Self {
        self.configured_tracker_secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn with_signing_secret(mut self, secret: Option<String>) -> Self {
        self.signing_secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn router(&self) -> &Arc<ChangeRouter> {
        &self.router
    }

    pub fn signing_secret(&self) -> Option<&str> {
        self.signing_secret.as_deref()
    }

    pub async fn tracker_secret(&self) -> Option<String> {
        if let Some(secret) = &self.configured_tracker_secret {
            return Some(secret.clone());
        }
        self.adopted_tracker_secret.read().await.clone()
    }

    /// Remember a handshake secret. Returns false when a secret is already
    /// known, either configured or adopted from an earlier handshake.
    pub async fn adopt_tracker_secret(&self, secret: &str) -> bool {
        if self.configured_tracker_secret.is_some() {
            return false;
        }
        let mut adopted = self.adopted_tracker_secret.write().await;
        if adopted.is_some() {
            return false;
        }
        *adopted = Some(secret.to_string());
        true
    }

    /// Background tasks processing accepted deliveries.
    pub fn deliveries(&self) -> &TaskTracker {
        &self.deliveries
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub fn build_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route(TRACKER_WEBHOOK_PATH, post(tracker_webhook))
        .route(LIST_EVENTS_PATH, post(list_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

/// Serve webhooks until Ctrl-C or SIGTERM, then stop the echo sweeper and
/// let in-flight deliveries finish.
pub async fn start_gateway(router: ChangeRouter, config: &BridgeConfig) -> anyhow::Result<()> {
    let router = Arc::new(router);
    let state = Arc::new(
        GatewayState::new(router.clone())
            .with_tracker_secret(config.tracker.webhook_secret.clone())
            .with_signing_secret(config.list.signing_secret.clone()),
    );

    let cancel = CancellationToken::new();
    let sweeper = router
        .echo()
        .clone()
        .spawn_sweeper(config.sync.sweep_interval(), cancel.clone());

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind.to_addr(), config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    info!("Listbridge v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Tracker webhook: http://{}{}", bind_addr, TRACKER_WEBHOOK_PATH);
    info!("  List events:     http://{}{}", bind_addr, LIST_EVENTS_PATH);
    info!("  List: {}", router.list_id());
    if state.signing_secret().is_none() {
        warn!("no list signing secret configured; list deliveries are not verified");
    }

    let app = build_app(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!("echo sweeper ended abnormally: {}", e);
    }
    state.deliveries().close();
    state.deliveries().wait().await;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
        "echo_entries": state.router().echo().len(),
        "list_id": state.router().list_id(),
    }))
}

async fn index_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "listbridge",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "tracker_webhook": format!("POST {TRACKER_WEBHOOK_PATH}"),
            "list_events": format!("POST {LIST_EVENTS_PATH}"),
        }
    }))
}
