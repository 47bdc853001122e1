use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use changeguard::routes::api_routes;
use changeguard::{InMemoryVault, RequestRegistry, SecretsService, UnsealRelay};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

fn app(vault: &Arc<InMemoryVault>) -> Router {
    let service: Arc<dyn SecretsService> = vault.clone();
    let relay = Arc::new(UnsealRelay::new(service.clone()));
    let registry = Arc::new(RequestRegistry::new(service, relay));
    api_routes().layer(Extension(registry))
}

fn vault() -> Arc<InMemoryVault> {
    Arc::new(
        InMemoryVault::new(vec!["k1".into(), "k2".into()], 2)
            .with_token("s.alice", "token-alice", &["default"]),
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
    (status, value)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Vault-Token", "s.alice")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn request_lifecycle_over_http() {
    let vault = vault();
    let app = app(&vault);

    let (status, created) = send(
        &app,
        json_request(
            "POST",
            "/v1/requests",
            json!({"Type": "Policy", "Name": "readonly", "Rules": "path \"a\" {}"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let change_id = created["change_id"].as_str().unwrap().to_string();

    let (status, detail) = send(
        &app,
        Request::builder()
            .uri(format!("/v1/requests/{change_id}"))
            .header("X-Vault-Token", "s.alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["root_only"], true);
    assert_eq!(detail["request"]["Name"], "readonly");

    let (status, progress) = send(
        &app,
        json_request(
            "POST",
            &format!("/v1/requests/{change_id}/approve"),
            json!({"unseal": "k1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress, json!({"status": "pending", "progress": 1, "required": 2}));

    let (status, applied) = send(
        &app,
        json_request(
            "POST",
            &format!("/v1/requests/{change_id}/approve"),
            json!({"unseal": "k2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(applied, json!({"status": "applied"}));
    assert_eq!(vault.policy("readonly").as_deref(), Some("path \"a\" {}"));

    let (status, _) = send(
        &app,
        Request::builder()
            .uri(format!("/v1/requests/{change_id}"))
            .header("X-Vault-Token", "s.alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let vault = vault();
    let app = app(&vault);

    let (_, created) = send(
        &app,
        json_request("POST", "/v1/requests", json!({"Type": "policy", "Name": "ops"})),
    )
    .await;
    let change_id = created["change_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v1/requests/{change_id}"))
            .header("X-Vault-Token", "s.alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        Request::builder()
            .uri(format!("/v1/requests/{change_id}"))
            .header("X-Vault-Token", "s.alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_type_is_bad_request() {
    let vault = vault();
    let app = app(&vault);
    let (status, body) = send(
        &app,
        json_request("POST", "/v1/requests", json!({"Type": "Secret", "Name": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("unsupported request type"));
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let vault = vault();
    let app = app(&vault);
    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v1/requests")
            .header("content-type", "application/json")
            .body(Body::from(json!({"Type": "Policy", "Name": "x"}).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
