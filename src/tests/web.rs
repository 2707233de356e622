use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tower::ServiceExt;

use super::support::{corpus, write_csv, Harness};
use crate::identity;
use crate::web;

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn indexed_harness() -> Harness {
    let harness = Harness::new();
    harness.service.index_issues(corpus()).unwrap();
    harness
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health() {
    let harness = indexed_harness();
    let app = web::router(harness.service.clone());

    let (status, body) = send(app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["healthy"], true);
    assert_eq!(body["record_count"], 8);
    assert_eq!(body["embedding_model_id"], "test-hashing-embedder");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_degraded() {
    let harness = indexed_harness();
    harness.reranker.fail.store(true, Ordering::SeqCst);
    let app = web::router(harness.service.clone());

    let (status, body) = send(app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["record_count"], 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_index_then_search() {
    let harness = Harness::new();
    let app = web::router(harness.service.clone());

    let issues = serde_json::to_value(corpus()).unwrap();
    let (status, body) = send(
        app.clone(),
        Method::POST,
        "/index",
        Some(json!({ "issues": issues })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["indexed"], 8);
    assert_eq!(body["errors"], 0);
    assert_eq!(body["total_issues"], 8);

    let (status, body) = send(
        app,
        Method::POST,
        "/search",
        Some(json!({
            "query": "CUDA out of memory during training",
            "top_k": 3,
            "rerank": false,
            "suggest_labels": true,
            "max_labels": 2
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "CUDA out of memory during training");
    assert_eq!(body["total_results"], 3);
    assert_eq!(body["empty_collection"], false);
    assert_eq!(body["results"][0]["title"], "CUDA out of memory during training");
    assert_eq!(body["results"][0]["labels"], json!(["bug", "cuda"]));

    let suggestions = body["suggested_labels"].as_array().unwrap();
    assert!(!suggestions.is_empty() && suggestions.len() <= 2);
    assert!(suggestions[0]["frequency"].as_u64().unwrap() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_defaults_and_no_suggestions() {
    let harness = indexed_harness();
    let app = web::router(harness.service.clone());

    let (status, body) = send(app, Method::POST, "/search", Some(json!({"query": "memory"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_results"], 8);
    assert!(body.get("suggested_labels").is_none());
    assert_eq!(harness.reranker.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_index() {
    let harness = Harness::new();
    let app = web::router(harness.service.clone());

    let (status, body) = send(
        app,
        Method::POST,
        "/index",
        Some(json!({"issues": [
            {"title": "Valid", "url": "https://x.dev/1"},
            {"title": "No url"}
        ]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["indexed"], 1);
    assert_eq!(body["errors"], 1);
    assert_eq!(body["error_details"][0], "issue 2: missing url");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_requests() {
    let harness = indexed_harness();
    let app = web::router(harness.service.clone());

    let (status, body) = send(
        app.clone(),
        Method::POST,
        "/search",
        Some(json!({"query": "memory", "top_k": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("top_k"));

    let (status, _) = send(
        app.clone(),
        Method::POST,
        "/search",
        Some(json!({"query": "memory", "rerank_top_k": 51})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app.clone(), Method::POST, "/search", Some(json!({"top_k": 3}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/index")
        .header("content-type", "application/json")
        .body(Body::from("{\"issues\": [ broken"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_model_failure_is_unavailable() {
    let harness = indexed_harness();
    harness.embedder.fail.store(true, Ordering::SeqCst);
    let app = web::router(harness.service.clone());

    let (status, body) = send(app, Method::POST, "/search", Some(json!({"query": "memory"}))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("embedding"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_issue() {
    let harness = indexed_harness();
    let app = web::router(harness.service.clone());

    let id = identity::assign("https://github.com/org/repo/issues/3").unwrap();
    let (status, body) = send(app.clone(), Method::GET, &format!("/issue/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Docs typo in installation guide");

    let (status, body) = send(app, Method::GET, "/issue/v1-unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "issue not found");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clear_collection() {
    let harness = indexed_harness();
    let app = web::router(harness.service.clone());

    let (status, body) = send(app.clone(), Method::DELETE, "/collection", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["indexed_issues"], 0);

    let (status, body) = send(app, Method::POST, "/search", Some(json!({"query": "memory"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["empty_collection"], true);
    assert_eq!(body["total_results"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reindex() {
    let harness = indexed_harness();
    write_csv(
        &harness.source_dir(),
        "issues.csv",
        &[
            ("Only issue left", "https://x.dev/1", "", "bug"),
            ("", "https://x.dev/2", "", ""),
        ],
    );
    let app = web::router(harness.service.clone());

    let (status, body) = send(app, Method::POST, "/reindex", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["loaded"], 1);
    assert_eq!(body["errors"], 1);
    assert_eq!(body["total_issues"], 1);
}
