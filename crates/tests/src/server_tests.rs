//! HTTP API tests driven through the axum router with `oneshot`.

use crate::mock_infrastructure::{MockCluster, MockEngine};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use multiclient_core::{config::AppConfig, engine::EngineError};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn app(cluster: &MockCluster) -> Router {
    server::create_app(cluster.client.clone(), &AppConfig::default())
}

fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

#[tokio::test]
async fn test_single_request_returns_engine_payload() {
    let cluster = MockCluster::new(vec![MockEngine::new("a").with_height(100)]);
    cluster.probe_all().await;

    let (status, body) = call(
        app(&cluster),
        json_request(
            Method::POST,
            "/api/v1/request",
            &json!({"payload": {"@type": "getAccountState"}, "mode": "single"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "single");
    assert_eq!(body["engine_id"], cluster.ids[0].0);
    assert_eq!(body["payload"]["engine"], "a");
    assert_eq!(body["attempts"], 1);
}

#[tokio::test]
async fn test_broadcast_all_results_over_http() {
    let cluster = MockCluster::new(vec![
        MockEngine::new("a").with_height(100),
        MockEngine::new("b").with_height(100).with_latency(Duration::from_millis(500)),
    ]);
    cluster.probe_all().await;

    let (status, body) = call(
        app(&cluster),
        json_request(
            Method::POST,
            "/api/v1/request",
            &json!({
                "payload": {"@type": "getAccountState"},
                "mode": "broadcast",
                "policy": "all_results",
                "timeout_ms": 50
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "broadcast");
    let outcomes = &body["outcomes"];
    assert_eq!(outcomes[cluster.ids[0].to_string()]["status"], "success");
    assert_eq!(outcomes[cluster.ids[1].to_string()]["status"], "timeout");
}

#[tokio::test]
async fn test_empty_pool_is_service_unavailable() {
    let cluster = MockCluster::new(Vec::new());

    let (status, body) = call(
        app(&cluster),
        json_request(Method::POST, "/api/v1/request", &json!({"payload": {}})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "pool_empty");
}

#[tokio::test]
async fn test_all_engines_failed_is_bad_gateway() {
    let cluster = MockCluster::new(vec![MockEngine::new("a")
        .with_height(100)
        .with_failure(EngineError::Unreachable("reset".to_string()))]);
    cluster.probe_all().await;

    let (status, body) = call(
        app(&cluster),
        json_request(Method::POST, "/api/v1/request", &json!({"payload": {}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "all_engines_failed");
    assert_eq!(body["failures"][0]["kind"], "unreachable");
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let cluster = MockCluster::new(vec![MockEngine::new("a").with_height(100)]);

    let (status, body) = call(
        app(&cluster),
        json_request(
            Method::POST,
            "/api/v1/request",
            &json!({"payload": {}, "mode": "single", "limit": 3}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "bad_request");
    assert_eq!(cluster.engines[0].calls(), 0);
}

#[tokio::test]
async fn test_health_endpoint_tracks_engine_states() {
    let cluster = MockCluster::new(vec![MockEngine::new("a").with_height(100)]);

    let (status, body) = call(app(&cluster), empty_request(Method::GET, "/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["engines"]["unknown"], 1);

    cluster.probe_all().await;
    let (status, body) = call(app(&cluster), empty_request(Method::GET, "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["engines"]["healthy"], 1);
    assert_eq!(body["consensus_height"], 100);
}

#[tokio::test]
async fn test_admin_engine_lifecycle() {
    let cluster = MockCluster::new(Vec::new());
    cluster.connector.register("mock://ls-9", MockEngine::new("ls-9").with_height(55));

    let (status, created) = call(
        app(&cluster),
        json_request(
            Method::POST,
            "/admin/engines",
            &json!({"name": "ls-9", "address": "mock://ls-9"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_u64().unwrap();

    let probe_uri = format!("/admin/engines/{id}/probe");
    let (status, probed) = call(app(&cluster), empty_request(Method::POST, &probe_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(probed["state"], "healthy");
    assert_eq!(probed["height"], 55);

    let (status, listed) = call(app(&cluster), empty_request(Method::GET, "/admin/engines")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, height) =
        call(app(&cluster), empty_request(Method::GET, "/admin/consensus-height")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(height["height"], 55);

    let (status, replaced) =
        call(app(&cluster), empty_request(Method::PUT, &format!("/admin/engines/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let new_id = replaced["id"].as_u64().unwrap();
    assert_ne!(new_id, id);

    let (status, _) =
        call(app(&cluster), empty_request(Method::DELETE, &format!("/admin/engines/{new_id}")))
            .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) =
        call(app(&cluster), empty_request(Method::DELETE, &format!("/admin/engines/{new_id}")))
            .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_admin_rejects_bad_targets() {
    let cluster = MockCluster::new(Vec::new());

    let (status, _) = call(
        app(&cluster),
        json_request(Method::POST, "/admin/engines", &json!({"name": "bad name", "address": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        app(&cluster),
        json_request(
            Method::POST,
            "/admin/engines",
            &json!({"name": "ghost", "address": "mock://ghost"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "connect_failed");
}

#[tokio::test]
async fn test_metrics_endpoint_renders_prometheus_text() {
    let cluster = MockCluster::new(vec![MockEngine::new("a").with_height(100)]);
    cluster.client.start();

    let response = app(&cluster).oneshot(empty_request(Method::GET, "/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/plain")));

    cluster.client.shutdown();
}
