//! Readiness endpoint.
//!
//! Serves `GET /healthz` so the deployment can probe the controller. It does
//! not touch scaling state.

use crate::error::ControllerError;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Router exposing the health check
pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Serves the readiness endpoint on all interfaces until `shutdown` flips to `true`
pub async fn serve(port: u16, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Readiness endpoint listening on {}", addr);

    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            // Err means the sender is gone, which also means shutdown
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Readiness endpoint stopped");
    Ok(())
}
