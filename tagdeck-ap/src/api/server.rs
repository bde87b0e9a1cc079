//! HTTP server setup and routing

use crate::bridge::remote::RemoteInterpreter;
use crate::bridge::ws::ClientHub;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::playback::player::PlayerHandle;
use crate::settings::SettingsStore;
use crate::state::SharedState;
use crate::tags::TagStore;
use crate::upload::UploadPipeline;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub shared: Arc<SharedState>,
    pub player: PlayerHandle,
    pub tags: TagStore,
    pub settings: SettingsStore,
    pub uploads: UploadPipeline,
    pub hub: Arc<ClientHub>,
    pub interpreter: Arc<RemoteInterpreter>,
}

/// Build the router with every endpoint
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))

        // Storage explorer
        .route(
            "/explorer",
            get(super::explorer::list)
                .post(super::explorer::upload)
                .delete(super::explorer::delete)
                .put(super::explorer::create)
                .patch(super::explorer::rename),
        )
        .route("/explorerdownload", get(super::explorer::download))
        .route("/exploreraudio", post(super::explorer::play))

        // Playback
        .route("/trackprogress", get(super::handlers::track_progress))

        // Tag assignments
        .route(
            "/rfid",
            get(super::rfid::get_tags)
                .post(super::rfid::assign)
                .delete(super::rfid::remove),
        )
        .route("/rfid/ids-only", get(super::rfid::ids_only))
        .route("/rfid/:id", get(super::rfid::get_tag))
        .route("/rfidnvserase", post(super::rfid::erase_all))
        .route("/upload", post(super::rfid::restore))

        // Settings
        .route(
            "/settings",
            get(super::settings::get_settings).post(super::settings::post_settings),
        )

        // Real-time channel
        .route("/ws", get(super::handlers::websocket))

        // Attach application context
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn run(ctx: AppContext, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.port));
    let app = router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
