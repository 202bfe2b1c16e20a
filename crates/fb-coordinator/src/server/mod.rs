//! HTTP and WebSocket server

mod api;
pub mod error;
mod socket;

pub use error::ApiError;

use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::state::CoordinatorState;

/// Build the coordinator router
pub fn router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/", get(api::service_info))
        .route("/health", get(api::health))
        .route("/ws/connect", get(socket::connect))
        .route("/trigger-download/:client_id", post(api::trigger_download))
        .route("/status/:client_id", get(api::client_status))
        .route("/uploads/:upload_id", get(api::upload_status))
        .route("/uploads/:upload_id/cancel", post(api::cancel_upload))
        .route("/clients", get(api::list_clients))
        .with_state(state)
}

/// Serve `app` on `listener` until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Listening on {}", addr);
    }
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
}
