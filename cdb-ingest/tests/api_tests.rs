//! HTTP API integration tests
//!
//! Drives the axum router directly with tower's oneshot — no listener.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

use cdb_common::config::TomlConfig;
use cdb_ingest::geocode::GeocoderChain;
use cdb_ingest::{build_router, AppState};

async fn test_router() -> axum::Router {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    cdb_common::db::create_tables(&pool).await.unwrap();

    let config = TomlConfig::default();
    // Empty chain: geocoding resolves to nothing, no network
    let chain = Arc::new(GeocoderChain::new(vec![], 0));
    build_router(AppState::with_geocoder(pool, &config, chain))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let router = test_router().await;

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_submit_rejects_unknown_entity_kind() {
    let router = test_router().await;

    let response = router
        .oneshot(post_json(
            "/ingest/records",
            json!({
                "entity_kind": "venue",
                "source": "csv",
                "payload": {}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_submit_then_run_to_completion() {
    let router = test_router().await;

    // Submit one business record
    let response = router
        .clone()
        .oneshot(post_json(
            "/ingest/records",
            json!({
                "entity_kind": "business",
                "source": "csv",
                "payload": {
                    "name": "Al-Noor Market",
                    "category": "grocery",
                    "address_city": "Denver",
                    "address_state": "CO",
                    "latitude": 39.74,
                    "longitude": -104.98,
                    "region": "CO"
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let submitted = body_json(response).await;
    let batch = submitted["ingest_run_id"].as_str().unwrap().to_string();

    // Trigger a run over that batch
    let response = router
        .clone()
        .oneshot(post_json(
            "/runs",
            json!({
                "build_type": "businesses",
                "ingest_run_id": batch
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Poll until the background run completes
    let mut last_status = String::new();
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/runs/{}", batch))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        last_status = body["status"].as_str().unwrap().to_string();

        if last_status != "running" {
            assert_eq!(last_status, "success");
            assert_eq!(body["records_processed"], 1);
            assert_eq!(body["records_failed"], 0);
            return;
        }
    }

    panic!("run never completed, last status: {}", last_status);
}

#[tokio::test]
async fn test_double_trigger_conflicts() {
    let router = test_router().await;

    let batch = uuid::Uuid::new_v4().to_string();
    let trigger = json!({"build_type": "all", "ingest_run_id": batch});

    let first = router.clone().oneshot(post_json("/runs", trigger.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Give the background task a moment to insert the run row
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let second = router.clone().oneshot(post_json("/runs", trigger)).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let router = test_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/runs/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
