use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use devops_gate::comms::http_api::{create_router, AppState};
use devops_gate::dispatch::EchoDispatcher;
use devops_gate::security::replay::MemoryReplayStore;
use devops_gate::service::config::Config;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

fn test_router_with(config: Config) -> Router {
    let state = Arc::new(AppState::new(
        Arc::new(config),
        Arc::new(MemoryReplayStore::new()),
        Arc::new(EchoDispatcher),
    ));
    create_router(state)
}

// Helper to create router with the in-memory replay store
fn test_router() -> Router {
    test_router_with(Config::new("K", "jwt-secret"))
}

async fn body_string(response: axum::response::Response) -> String {
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body_bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_wrong_method_on_dispatch_path() {
    for method in ["GET", "PUT", "DELETE", "PATCH"] {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/DevOps")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "method {method}");
        assert_eq!(body_string(response).await, "ERROR");
    }
}

#[tokio::test]
async fn test_unknown_paths_rejected_uniformly() {
    for (method, uri) in [
        ("GET", "/"),
        ("POST", "/devops"),
        ("POST", "/DevOps/extra"),
        ("DELETE", "/anything/else"),
        ("POST", "/health"),
    ] {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{method} {uri}");
        assert_eq!(body_string(response).await, "ERROR");
    }
}

#[tokio::test]
async fn test_acme_challenge_served_without_credentials() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tok123"), "tok123.thumbprint").unwrap();

    let mut config = Config::new("K", "jwt-secret");
    config.acme_challenge_dir = Some(dir.path().to_str().unwrap().to_string());
    let app = test_router_with(config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/.well-known/acme-challenge/tok123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "tok123.thumbprint");
}

#[tokio::test]
async fn test_acme_path_disabled_by_default() {
    let response = test_router()
        .oneshot(
            Request::builder()
                .uri("/.well-known/acme-challenge/tok123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_acme_path_rejects_like_any_unmatched_route() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tok123"), "tok123.thumbprint").unwrap();

    let mut config = Config::new("K", "jwt-secret");
    config.acme_challenge_dir = Some(dir.path().to_str().unwrap().to_string());
    let app = test_router_with(config);

    for (method, uri) in [
        ("POST", "/.well-known/acme-challenge/tok123"),
        ("DELETE", "/.well-known/acme-challenge/tok123"),
        ("PUT", "/.well-known/acme-challenge/tok123"),
        ("GET", "/.well-known/acme-challenge/missing"),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{method} {uri}");
        assert_eq!(body_string(response).await, "ERROR");
    }
}
