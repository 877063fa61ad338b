//! HTTP API for the coordinator
//!
//! Node processes use the `/store` and `/children` endpoints to read their
//! activation data and to touch their path once they are up. Operators use
//! `/admin` to inspect the ring and to add or remove nodes.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::coordinator::repository::CacheStrategy;
use crate::coordinator::server::{Coordinator, ProvisionResult};
use crate::store::memory::list_child_paths;
use crate::store::{CoordinationStore, MemoryStore};
use crate::Error;

/// Largest payload accepted on `/store` and `/admin`
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared coordinator state for HTTP handlers.
#[derive(Clone)]
pub struct CoordState {
    pub store: Arc<MemoryStore>,
    pub coordinator: Arc<Coordinator>,
}

/// Creates the HTTP router with all public endpoints.
pub fn create_router(state: CoordState) -> Router {
    Router::new()
        // Coordination store access for node processes
        .route(
            "/store/*path",
            axum::routing::get(store_get).put(store_put),
        )
        .route("/children/*path", axum::routing::get(store_children))
        .route("/health", axum::routing::get(health))
        // Admin endpoints
        .route("/admin/status", axum::routing::get(admin_status))
        .route("/admin/ring", axum::routing::get(admin_ring))
        .route(
            "/admin/nodes",
            axum::routing::post(admin_add_nodes).delete(admin_remove_nodes),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(err: Error) -> Response {
    (
        err.to_http_status(),
        axum::Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn absolute(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

async fn store_get(State(state): State<CoordState>, Path(path): Path<String>) -> Response {
    let path = absolute(&path);
    match state.store.get_data(&path, None) {
        Ok((data, _)) => (StatusCode::OK, data).into_response(),
        Err(e) => error_response(e),
    }
}

/// Replace the data at a path. A storage node calls this on its own path to
/// confirm that it is up.
async fn store_put(
    State(state): State<CoordState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let path = absolute(&path);
    match state.store.set_data(&path, &body) {
        Ok(stat) => (StatusCode::OK, axum::Json(json!(stat))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn store_children(State(state): State<CoordState>, Path(path): Path<String>) -> Response {
    let path = absolute(&path);
    match list_child_paths(state.store.as_ref(), &path) {
        Ok(children) => (StatusCode::OK, axum::Json(json!(children))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let available = state.store.is_available();
    let status = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        axum::Json(json!({
            "status": if available { "healthy" } else { "degraded" },
            "version": crate::VERSION,
            "store_available": available,
            "watcher": state.coordinator.watcher_state(),
        })),
    )
}

async fn admin_status(State(state): State<CoordState>) -> impl IntoResponse {
    (StatusCode::OK, axum::Json(json!(state.coordinator.status())))
}

async fn admin_ring(State(state): State<CoordState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(json!(state.coordinator.ring().ranges())),
    )
}

/// Request body for adding nodes
#[derive(Debug, Deserialize)]
struct AddNodesRequest {
    count: usize,
    cache_strategy: CacheStrategy,
    cache_size: usize,
    /// Overrides the configured await timeout
    timeout_ms: Option<u64>,
}

async fn admin_add_nodes(
    State(state): State<CoordState>,
    axum::Json(req): axum::Json<AddNodesRequest>,
) -> Response {
    let coordinator = state.coordinator.clone();
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| coordinator.config().await_timeout());

    // Provisioning blocks until the nodes confirm or the timeout elapses.
    let result = tokio::task::spawn_blocking(move || {
        coordinator.provision(req.count, req.cache_strategy, req.cache_size, timeout)
    })
    .await;

    match result {
        Ok(result) => {
            let status = match &result {
                ProvisionResult::Success { .. } => StatusCode::OK,
                ProvisionResult::CapacityError { .. }
                | ProvisionResult::CoordinationUnavailable { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ProvisionResult::LaunchFailure { .. } => StatusCode::BAD_GATEWAY,
                ProvisionResult::TimeoutError { .. } => StatusCode::GATEWAY_TIMEOUT,
            };
            (status, axum::Json(json!(result))).into_response()
        }
        Err(e) => error_response(Error::Internal(format!("provision task failed: {}", e))),
    }
}

/// Request body for removing nodes
#[derive(Debug, Deserialize)]
struct RemoveNodesRequest {
    names: Vec<String>,
}

async fn admin_remove_nodes(
    State(state): State<CoordState>,
    axum::Json(req): axum::Json<RemoveNodesRequest>,
) -> Response {
    let coordinator = state.coordinator.clone();
    let names = req.names.clone();
    match tokio::task::spawn_blocking(move || coordinator.decommission(&names)).await {
        Ok(success) => {
            let status = if success {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            };
            (
                status,
                axum::Json(json!({ "success": success, "names": req.names })),
            )
                .into_response()
        }
        Err(e) => error_response(Error::Internal(format!("decommission task failed: {}", e))),
    }
}
