use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tracing::{info, warn};

use crate::api::handlers::{handle_create, handle_get, handle_health, AppState};
use crate::error::ServerError;

pub struct PredictionServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl PredictionServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Serve until SIGINT or SIGTERM, then drain in-flight requests.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = build_router(self.state);
        info!(addr = %self.addr, "prediction server listening");
        axum::Server::bind(&self.addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("prediction server stopped");
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/predictions", post(handle_create))
        .route("/predictions/:id", get(handle_get))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Rejects prediction requests without the configured bearer token. A server
/// with no token configured lets everything through.
async fn require_token<B>(State(state): State<AppState>, req: Request<B>, next: Next<B>) -> Response {
    if let Some(expected) = state.config.access_token.as_deref() {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected) {
            return ServerError::Unauthorized.into_response();
        }
    }
    next.run(req).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
