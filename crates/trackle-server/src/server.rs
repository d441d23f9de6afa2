use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use trackle_engine::Spool;

/// Server configuration.
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_owned(),
            port: 8190,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub spool: Arc<Spool>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle with the bound port.
pub async fn start(config: ServerConfig, spool: Arc<Spool>) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState { spool });
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "webhook server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server: server_handle,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Run until the server stops (process interruption).
    pub async fn wait(self) {
        self.server.await.ok();
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
}

/// Accept one delivery. The sender is acknowledged before any processing:
/// the spool write happens on a background task, and a processing failure
/// is never visible as a failed delivery.
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let captured = capture_headers(&headers);
    let spool = Arc::clone(&state.spool);

    tokio::task::spawn_blocking(move || match spool.enqueue(&body, &captured) {
        Ok(Some(name)) => tracing::debug!(name = %name, "delivery spooled"),
        Ok(None) => tracing::debug!("duplicate delivery skipped"),
        Err(e) => tracing::error!(error = %e, "failed to spool delivery"),
    });

    Json(serde_json::json!({"ok": true}))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy"}))
}

/// Keep every header whose value is valid UTF-8. Signature verification
/// later needs the original names, so nothing is filtered or renamed here.
fn capture_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}
