//! HTTP server for the control API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, routing::get};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use super::v0;
use crate::alarm::sound::AlarmSoundResolver;
use crate::coordinator::ChannelCoordinator;
use crate::tracing::prelude::*;

/// State shared by all handlers.
#[derive(Clone)]
pub struct SharedState {
    pub coordinator: Arc<ChannelCoordinator>,
    pub sounds: Arc<Mutex<AlarmSoundResolver>>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "formwatch",
        description = "Control API of the form-status monitor daemon.",
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "monitor", description = "Slot monitoring and the alarm"),
        (name = "sound", description = "Alarm sound selection"),
    ),
)]
struct ApiDoc;

/// Build the application router. The OpenAPI document is served at
/// `/api-docs/openapi.json`.
pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .route(
            "/api-docs/openapi.json",
            get(move || {
                let api = api.clone();
                async move { Json(api) }
            }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: SharedState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding API server to {addr}"))?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server failed")?;

    debug!("API server stopped");
    Ok(())
}
