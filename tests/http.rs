//! HTTP surface tests (router driven in-process)

use axum::body::Body;
use axum::http::{Request, StatusCode};
use kvecs::common::{parse_node_config, CoordinatorConfig};
use kvecs::coordinator::http::{create_router, CoordState};
use kvecs::coordinator::NoopLauncher;
use kvecs::store::{CoordinationStore, MemoryStore};
use kvecs::Coordinator;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const NODES: &str = "A 127.0.0.1 5000\nB 127.0.0.1 5001\nC 127.0.0.1 5002\n";

fn state() -> CoordState {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::start(
        CoordinatorConfig::default(),
        &parse_node_config(NODES).unwrap(),
        store.clone(),
        Arc::new(NoopLauncher),
    )
    .unwrap();
    CoordState {
        store,
        coordinator: Arc::new(coordinator),
    }
}

async fn send(state: &CoordState, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = create_router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let state = state();
    let (status, body) = send(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store_available"], true);
}

#[tokio::test]
async fn test_admin_ring_and_status() {
    let state = state();

    let (status, body) = send(&state, get("/admin/ring")).await;
    assert_eq!(status, StatusCode::OK);
    let ranges: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ranges.as_array().unwrap().len(), 3);

    let (status, body) = send(&state, get("/admin/status")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["root_path"], "/ecs");
    assert_eq!(json["available"].as_array().unwrap().len(), 3);
    assert!(json["active"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_store_read_and_touch() {
    let state = state();
    state.store.create("/ecs/A", b"payload").unwrap();

    let (status, body) = send(&state, get("/store/ecs/A")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"payload");

    let touch = Request::builder()
        .method("PUT")
        .uri("/store/ecs/A")
        .body(Body::from("SERVER_STARTED"))
        .unwrap();
    let (status, body) = send(&state, touch).await;
    assert_eq!(status, StatusCode::OK);
    let stat: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stat["version"], 1);

    let (status, body) = send(&state, get("/children/ecs")).await;
    assert_eq!(status, StatusCode::OK);
    let children: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(children, json!(["/ecs/A"]));
}

#[tokio::test]
async fn test_store_missing_path() {
    let state = state();
    let (status, _) = send(&state, get("/store/ecs/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_add_nodes_times_out_without_nodes() {
    let state = state();
    let req = json_request(
        "POST",
        "/admin/nodes",
        json!({ "count": 1, "cache_strategy": "LRU", "cache_size": 10, "timeout_ms": 100 }),
    );
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["result"], "timeout_error");
    assert_eq!(json["confirmed"], 0);
    assert_eq!(state.coordinator.repository().active_count(), 1);
}

#[tokio::test]
async fn test_add_nodes_capacity_error() {
    let state = state();
    let req = json_request(
        "POST",
        "/admin/nodes",
        json!({ "count": 3, "cache_strategy": "FIFO", "cache_size": 10 }),
    );
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["result"], "capacity_error");
}

#[tokio::test]
async fn test_remove_nodes() {
    let state = state();
    let req = json_request(
        "POST",
        "/admin/nodes",
        json!({ "count": 1, "cache_strategy": "LRU", "cache_size": 10, "timeout_ms": 50 }),
    );
    send(&state, req).await;
    let name = state.coordinator.repository().active_set()[0].node.name.clone();

    let req = json_request("DELETE", "/admin/nodes", json!({ "names": [name] }));
    let (status, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.coordinator.repository().active_count(), 0);

    let req = json_request("DELETE", "/admin/nodes", json!({ "names": ["ghost"] }));
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
}
