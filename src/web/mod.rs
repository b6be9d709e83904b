//! Read-only HTTP API for the graph view.

mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::signal;
use tracing::info;

use crate::core::config::{DataPaths, Settings};
use crate::search::embedding::{self, Encoder};

pub use routes::HttpError;

#[derive(Clone)]
pub struct AppState {
    pub paths: DataPaths,
    pub settings: Settings,
    pub encoder: Arc<dyn Encoder>,
}

impl AppState {
    pub fn new(paths: DataPaths, settings: Settings) -> Self {
        let encoder: Arc<dyn Encoder> = embedding::global(&settings.embedding);
        Self {
            paths,
            settings,
            encoder,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/graph", get(routes::graph))
        .route("/api/notes/{*key}", get(routes::note))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(Arc::new(state))
}

/// Serve the API on `bind` until Ctrl+C or SIGTERM.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
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
    info!("shutting down");
}
