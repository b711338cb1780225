//! Admin API end-to-end tests, driven through the router without a
//! listening socket.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use lorahub::api;
use lorahub::application::DummyApplicationBackend;
use lorahub::gateway::GatewayBackend;
use lorahub::lorawan::Eui64;
use lorahub::storage::MemoryStorage;
use lorahub::store::Gateway;
use lorahub::Client;

async fn test_app() -> (axum::Router, Arc<Client>) {
    let (backend, _rx) = GatewayBackend::bind(0).await.unwrap();
    let client = Client::new(
        Arc::new(MemoryStorage::new()),
        backend,
        Arc::new(DummyApplicationBackend::new()),
    );
    (api::router(client.clone()), client)
}

async fn request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, String) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn application_crud_round_trip() {
    let (router, _client) = test_app().await;
    let app = json!({
        "appEUI": "0202020202020202",
        "config": {"callbackURL": "http://example.com/handler"}
    });

    let (status, _) = request(&router, "POST", "/api/application", Some(app.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&router, "GET", "/api/application/0202020202020202", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), app);

    let updated = json!({
        "appEUI": "0202020202020202",
        "config": {"callbackURL": "http://example.com/other"}
    });
    let (status, _) = request(
        &router,
        "PUT",
        "/api/application/0202020202020202",
        Some(updated.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = request(&router, "GET", "/api/application/0202020202020202", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), updated);

    let (status, _) = request(
        &router,
        "DELETE",
        "/api/application/0202020202020202",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(&router, "GET", "/api/application/0202020202020202", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_duplicate_application_is_rejected() {
    let (router, _client) = test_app().await;
    let app = json!({"appEUI": "0202020202020202", "config": {}});

    let (status, _) = request(&router, "POST", "/api/application", Some(app.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&router, "POST", "/api/application", Some(app)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("object already exists"), "body: {body}");
}

#[tokio::test]
async fn malformed_input_is_a_bad_request() {
    let (router, _client) = test_app().await;

    // body is not an Application
    let (status, _) = request(
        &router,
        "POST",
        "/api/application",
        Some(json!({"appEUI": "too-short"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // id is not 8 bytes of hex
    let (status, _) = request(&router, "GET", "/api/application/0202", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // url and body disagree
    let (status, body) = request(
        &router,
        "PUT",
        "/api/application/0202020202020202",
        Some(json!({"appEUI": "0303030303030303", "config": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("should match"), "body: {body}");
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let (router, _client) = test_app().await;
    let (status, _) = request(
        &router,
        "POST",
        "/api/application/0202020202020202",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn node_crud_round_trip() {
    let (router, _client) = test_app().await;
    let node = json!({
        "devEUI": "0101010101010101",
        "appEUI": "0202020202020202",
        "appKey": "000102030405060708090a0b0c0d0e0f"
    });

    let (status, _) = request(&router, "POST", "/api/node", Some(node.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&router, "GET", "/api/node/0101010101010101", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), node);

    let (status, _) = request(&router, "DELETE", "/api/node/0101010101010101", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = request(&router, "GET", "/api/node/0101010101010101", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn node_session_crud_round_trip() {
    let (router, _client) = test_app().await;
    let session = json!({
        "devAddr": "01010101",
        "devEUI": "0101010101010101",
        "nwkSKey": "02".repeat(16),
        "appSKey": "03".repeat(16),
        "fCntUp": 10,
        "fCntDown": 0
    });

    let (status, _) = request(&router, "POST", "/api/nodesession", Some(session.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(&router, "GET", "/api/nodesession/01010101", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), session);

    let mut advanced = session.clone();
    advanced["fCntUp"] = json!(11);
    let (status, _) = request(
        &router,
        "PUT",
        "/api/nodesession/01010101",
        Some(advanced.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = request(&router, "GET", "/api/nodesession/01010101", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["fCntUp"], 11);
}

#[tokio::test]
async fn gateway_read_only_endpoint() {
    let (router, client) = test_app().await;

    let (status, _) = request(&router, "GET", "/api/gateway/0102030405060708", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    client
        .gateways()
        .upsert(&Gateway {
            mac: Eui64([1, 2, 3, 4, 5, 6, 7, 8]),
            updated_at: Utc::now(),
            latitude: 1.234,
            longitude: 2.123,
            altitude: 123,
            rx_packets_received: 1,
            rx_packets_received_ok: 2,
            rx_packets_forwarded: 3,
            ack_rate: 33.3,
            tx_packets_received: 4,
            config: HashMap::from([("udp_addr".to_string(), "127.0.0.1:1700".to_string())]),
        })
        .await
        .unwrap();

    let (status, body) = request(&router, "GET", "/api/gateway/0102030405060708", None).await;
    assert_eq!(status, StatusCode::OK);
    let gw: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(gw["latitude"], 1.234);
    assert_eq!(gw["config"]["udp_addr"], "127.0.0.1:1700");
}
