//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to drive the router without a real HTTP server,
//! over the in-memory intake queue.
//!
//! ```bash
//! cargo test -p beacon-api --test integration
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use beacon_api::routes::create_router;
use beacon_api::state::AppState;
use beacon_common::policy::TargetPolicy;
use beacon_common::queue::MemoryIntakeQueue;
use beacon_common::types::QueuedMessage;

// ============================================================
// Helpers
// ============================================================

fn state_with(
    intake: &Arc<MemoryIntakeQueue>,
    policy: TargetPolicy,
    allowed_ips: &[&str],
) -> AppState {
    let ips: Vec<IpAddr> = allowed_ips.iter().map(|ip| ip.parse().unwrap()).collect();
    AppState::new(intake.clone(), policy, ips)
}

fn push_request(body: serde_json::Value, peer: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri("/api/push")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let ip: IpAddr = peer.parse().unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(ip, 40000)));
    req
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn valid_body() -> serde_json::Value {
    serde_json::json!({
        "target_key": "13800000000",
        "template_id": "T1",
        "data": {"first": {"value": "hi"}},
        "deep_link": {"app_id": "wx1", "page_path": "pages/index"}
    })
}

// ============================================================
// Tests
// ============================================================

#[tokio::test]
async fn test_health() {
    let intake = Arc::new(MemoryIntakeQueue::new());
    let app = create_router(state_with(&intake, TargetPolicy::open(), &[]));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_push_enqueues_wire_format() {
    let intake = Arc::new(MemoryIntakeQueue::new());
    let app = create_router(state_with(&intake, TargetPolicy::open(), &[]));

    let mut req = push_request(valid_body(), "10.0.0.1");
    req.headers_mut().insert("x-app-id", "acme".parse().unwrap());
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], "queued");

    let entries = intake.entries();
    assert_eq!(entries.len(), 1);
    let msg = QueuedMessage::from_raw(&entries[0]).unwrap();
    assert_eq!(msg.target_key, "13800000000");
    assert_eq!(msg.retry_count, 0);
    assert_eq!(msg.tenant(), Some("acme"));
    assert_eq!(msg.deep_link.unwrap().page_path, "pages/index");
}

#[tokio::test]
async fn test_push_rejects_missing_data() {
    let intake = Arc::new(MemoryIntakeQueue::new());
    let app = create_router(state_with(&intake, TargetPolicy::open(), &[]));

    let body = serde_json::json!({"target_key": "1", "template_id": "T1"});
    let response = app.oneshot(push_request(body, "10.0.0.1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());
    assert!(intake.is_empty());
}

#[tokio::test]
async fn test_push_rejects_blocked_target() {
    let intake = Arc::new(MemoryIntakeQueue::new());
    let policy = TargetPolicy::open().with_blocklist(["13800000000".to_string()]);
    let app = create_router(state_with(&intake, policy, &[]));

    let response = app
        .oneshot(push_request(valid_body(), "10.0.0.1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(intake.is_empty());
}

#[tokio::test]
async fn test_ip_allowlist() {
    let intake = Arc::new(MemoryIntakeQueue::new());
    let state = state_with(&intake, TargetPolicy::open(), &["10.0.0.1"]);

    let response = create_router(state.clone())
        .oneshot(push_request(valid_body(), "10.9.9.9"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(intake.is_empty());

    let response = create_router(state.clone())
        .oneshot(push_request(valid_body(), "::ffff:10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Health is not behind the allowlist.
    let response = create_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_mapped_allowlist_entry_matches_ipv4_peer() {
    let intake = Arc::new(MemoryIntakeQueue::new());
    let state = state_with(&intake, TargetPolicy::open(), &["::ffff:10.0.0.1"]);

    let response = create_router(state)
        .oneshot(push_request(valid_body(), "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(intake.len(), 1);
}

#[tokio::test]
async fn test_queue_outage_is_server_error() {
    let intake = Arc::new(MemoryIntakeQueue::new());
    intake.set_unavailable(true);
    let app = create_router(state_with(&intake, TargetPolicy::open(), &[]));

    let response = app
        .oneshot(push_request(valid_body(), "10.0.0.1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
