//! Real-time relay for huddle chat rooms and WebRTC signaling.
//!
//! The relay keeps no state of record: it tracks live connections, chat
//! rooms and video rooms in memory and forwards events between browsers.

pub mod error;
pub mod relay;
pub mod routes;
pub mod ws;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::FromRef,
    http::HeaderValue,
    routing::get,
    Router,
};
use huddle_core::RegistryLimits;
use huddle_runtime_config::RelayConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use relay::Relay;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub config: Arc<RelayConfig>,
    pub started_at: Instant,
    /// Flips to `true` when the server begins shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = Relay::new(RegistryLimits {
            max_video_participants: config.limits.max_video_participants,
            max_rooms_per_connection: config.limits.max_rooms_per_connection,
        });
        let state = Self {
            relay,
            config: Arc::new(config),
            started_at: Instant::now(),
            shutdown: shutdown_rx,
        };
        (state, shutdown_tx)
    }
}

impl FromRef<AppState> for Relay {
    fn from_ref(state: &AppState) -> Self {
        state.relay.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/stats", get(routes::stats::stats))
        .route("/rooms/{kind}", get(routes::rooms::list_rooms))
        .route("/rooms/{kind}/{id}", get(routes::rooms::get_room));

    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Serve the relay on `listener` until `signal` resolves, then close every
/// open WebSocket session and wait for in-flight requests.
pub async fn run(
    listener: TcpListener,
    config: RelayConfig,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (state, shutdown_tx) = AppState::new(config);
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            tracing::info!("shutting down relay");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
