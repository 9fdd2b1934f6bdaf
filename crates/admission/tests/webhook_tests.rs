//! Integration tests for the webhook HTTP endpoints

use admission_lib::{
    health::{components, HealthRegistry},
    observability::AdmissionMetrics,
    store::TargetKey,
    AdmissionServer, FeatureGates, PolicyStore, SnapshotStore, VerticalRecommendation,
};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use vpa_admission::api::{create_router, AppState};

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let store = Arc::new(SnapshotStore::new());
    store.start().await.unwrap();
    let recommendation: VerticalRecommendation = serde_json::from_value(json!({
        "metadata": {"name": "api-rec", "namespace": "shop"},
        "spec": {
            "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "api"},
            "updatePolicy": {"updateMode": "Initial"}
        },
        "status": {"recommendation": {"containerRecommendations": [
            {"containerName": "api", "target": {"cpu": "500m", "memory": "1Gi"}}
        ]}}
    }))
    .unwrap();
    store.set_recommendations("shop", vec![recommendation]);
    store.set_target_selector(
        TargetKey::new("shop", "Deployment", "api"),
        LabelSelector {
            match_labels: Some([("app".to_string(), "api".to_string())].into()),
            match_expressions: None,
        },
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLICY_STORE).await;
    health_registry.register(components::WEBHOOK).await;

    let server = Arc::new(AdmissionServer::new(store, FeatureGates::default()));
    let state = Arc::new(AppState::new(
        server,
        health_registry,
        AdmissionMetrics::new(),
        Duration::from_secs(10),
    ));
    (create_router(state.clone()), state)
}

fn pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "generateName": "api-7d9f-",
            "namespace": "shop",
            "labels": {"app": "api"}
        },
        "spec": {"containers": [
            {"name": "api", "resources": {"limits": {"cpu": "2", "memory": "2Gi"}}}
        ]}
    })
}

fn review(object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "b6a7d1c2-0000-4c4e-9f3a-2f1d9c6d5e11",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "namespace": "shop",
            "operation": "CREATE",
            "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
            "object": object
        }
    })
}

async fn post_review(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_mutate_returns_patch_for_matching_pod() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = post_review(app, "/mutate?timeout=10s", review(pod())).await;
    assert_eq!(status, StatusCode::OK);

    let response = &body["response"];
    assert_eq!(response["uid"], "b6a7d1c2-0000-4c4e-9f3a-2f1d9c6d5e11");
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");
    assert!(response["patch"].is_string());
}

#[tokio::test]
async fn test_mutate_allows_unmatched_pod_unchanged() {
    let (app, _state) = setup_test_app().await;

    let mut object = pod();
    object["metadata"]["labels"] = json!({"app": "batch"});
    let (status, body) = post_review(app, "/mutate", review(object)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"]["patch"].is_null());
}

#[tokio::test]
async fn test_mutate_denies_unsupported_version() {
    let (app, _state) = setup_test_app().await;

    let mut body = review(pod());
    body["request"]["resource"]["version"] = json!("v1beta1");
    let (status, body) = post_review(app, "/mutate", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], false);
    assert!(body["response"]["status"]["message"]
        .as_str()
        .unwrap()
        .starts_with("unsupported version"));
}

#[tokio::test]
async fn test_mutate_rejects_review_without_request() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = post_review(
        app,
        "/mutate",
        json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], false);
}

#[tokio::test]
async fn test_healthz_includes_components() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["policy_store"].is_object());
    assert!(health["components"]["webhook"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_503_when_store_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::POLICY_STORE, "list call failed")
        .await;

    let (status, health) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_waits_for_store_sync() {
    let (app, state) = setup_test_app().await;

    let (status, readiness) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, readiness) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_admissions() {
    let (app, _state) = setup_test_app().await;
    post_review(app.clone(), "/mutate", review(pod())).await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();
    assert!(metrics_text.contains("vpa_admission_requests_total"));
    assert!(metrics_text.contains("vpa_admission_latency_seconds_bucket"));
}
