//! Keep-alive HTTP endpoint
//!
//! Answers liveness probes from the hosting platform. It shares nothing with
//! the pipeline besides the optional Prometheus handle.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::ScoutError;

#[derive(Clone, Default)]
pub struct HealthState {
    prometheus: Option<PrometheusHandle>,
}

impl HealthState {
    pub fn new(prometheus: Option<PrometheusHandle>) -> Self {
        Self { prometheus }
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn liveness() -> &'static str {
    "Bot is running."
}

async fn metrics_handler(State(state): State<HealthState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Serve the health endpoint on `bind` until `shutdown` fires.
pub async fn serve_health(
    bind: &str,
    state: HealthState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ScoutError> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| ScoutError::Configuration(format!("cannot bind health endpoint {bind}: {e}")))?;
    info!("Health endpoint listening on {}", bind);

    axum::serve(listener, health_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
