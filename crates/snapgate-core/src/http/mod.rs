//! HTTP - axum ルーターとサーバー
//!
//! - `/health` は認証なし
//! - それ以外は admission middleware（認証 → レート制限）を通る

pub mod admission;
pub mod error;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;

use crate::app::App;

pub use self::error::ApiError;

pub fn router(app: Arc<App>) -> Router {
    let authenticated = Router::new()
        .route(
            "/screenshot",
            get(handlers::screenshot_query).post(handlers::screenshot_body),
        )
        .route("/screenshot/async", post(handlers::screenshot_async))
        .route("/jobs/{job_id}", get(handlers::job_status))
        .route("/batch", post(handlers::batch))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&app),
            admission::admission,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(authenticated)
        .with_state(app)
}

/// Serve until `shutdown` resolves. In-flight requests are allowed to finish.
pub async fn serve<F>(listener: TcpListener, app: Arc<App>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown)
        .await
}
