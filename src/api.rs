//! Local API Server
//!
//! Read-only view of the pipeline: live switches, latch and store state,
//! the latest classification and the counters.

use crate::classifier::VariantKind;
use crate::latch::BeginLatch;
use crate::metrics::PipelineMetrics;
use crate::poller::{ClassificationPass, ClassificationReport};
use crate::registry::DatapathRegistry;
use crate::store::RecordStore;
use crate::{FlowclassError, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared handles read by the API handlers
pub struct ApiState {
    pub registry: Arc<DatapathRegistry>,
    pub latch: Arc<BeginLatch>,
    pub store: Arc<dyn RecordStore>,
    pub metrics: Arc<PipelineMetrics>,
    pub classification: Option<Arc<ClassificationPass>>,
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/datapaths", get(datapaths))
        .route("/classification", get(classification))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start local API server
pub async fn start_server(listen: &str, state: Arc<ApiState>) -> Result<()> {
    let app = build_router(state);

    tracing::info!("Flow classifier API listening on {}", listen);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| FlowclassError::Config(format!("bind {}: {}", listen, e)))?;

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    latch_armed: bool,
    datapaths: usize,
    flow_records: u64,
    port_records: u64,
    classification_enabled: bool,
    active_variant: Option<VariantKind>,
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").into(),
        latch_armed: state.latch.is_armed(),
        datapaths: state.registry.len(),
        flow_records: state.store.flow_count(),
        port_records: state.store.port_count(),
        classification_enabled: state.classification.is_some(),
        active_variant: state.classification.as_ref().and_then(|p| p.active_variant()),
    })
}

#[derive(Serialize)]
struct DatapathInfo {
    id: u64,
    hex: String,
}

async fn datapaths(State(state): State<Arc<ApiState>>) -> Json<Vec<DatapathInfo>> {
    Json(
        state
            .registry
            .list()
            .into_iter()
            .map(|id| DatapathInfo {
                id,
                hex: format!("{:016x}", id),
            })
            .collect(),
    )
}

async fn classification(
    State(state): State<Arc<ApiState>>,
) -> std::result::Result<Json<ClassificationReport>, StatusCode> {
    state
        .classification
        .as_ref()
        .and_then(|p| p.last_report())
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn prometheus_metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        state.metrics.prometheus(),
    )
}
