use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{self, MAX_BATCH_FILES, MAX_FILE_BYTES};
use crate::state::AppState;

/// JSON bodies carrying base64 images (apply-effects, strip, provider proxy).
const JSON_IMAGE_BODY_LIMIT: usize = 64 * 1024 * 1024;
/// Multipart uploads: every file at its cap plus room for form overhead.
const BATCH_BODY_LIMIT: usize = MAX_BATCH_FILES * MAX_FILE_BYTES + 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let image_limit = DefaultBodyLimit::max(JSON_IMAGE_BODY_LIMIT);

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route("/api/settings/reset", post(handlers::reset_settings))
        .route(
            "/api/effects",
            get(handlers::list_effects).post(handlers::create_effect),
        )
        .route("/api/effects/enabled", get(handlers::enabled_effects))
        .route(
            "/api/effects/{id}",
            put(handlers::update_effect).delete(handlers::delete_effect),
        )
        .route("/api/effects/{id}/toggle", post(handlers::toggle_effect))
        .route(
            "/api/apply-effects",
            post(handlers::apply_effects).layer(image_limit),
        )
        .route(
            "/api/provider/submit",
            post(handlers::provider_submit).layer(image_limit),
        )
        .route("/api/provider/result/{id}", get(handlers::provider_result))
        .route(
            "/api/process-batch",
            post(handlers::process_batch).layer(DefaultBodyLimit::max(BATCH_BODY_LIMIT)),
        )
        .route("/api/status/{job_id}", get(handlers::job_status))
        .route("/api/strip", post(handlers::strip).layer(image_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until Ctrl-C or SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}
