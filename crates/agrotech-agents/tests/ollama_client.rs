//! OllamaClient against an in-process mock server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agrotech_agents::{LlmTransport, OllamaClient, OllamaConfig, TransportError};
use agrotech_core::{GenerationOptions, PromptRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct MockState {
    calls: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(base_url: &str) -> OllamaConfig {
    OllamaConfig::new(base_url)
        .with_retries(3, Duration::from_millis(10))
        .with_timeouts(Duration::from_millis(300), Duration::from_millis(300))
}

fn request() -> PromptRequest {
    PromptRequest::new(
        "SoilSense",
        "condiciones ambientales y del suelo",
        "Analiza: suelo seco",
        GenerationOptions::default(),
    )
}

#[tokio::test]
async fn test_retries_transient_statuses() {
    let state = MockState::default();
    let app = Router::new()
        .route(
            "/api/generate",
            post(|State(state): State<MockState>, Json(body): Json<Value>| async move {
                state.bodies.lock().push(body);
                let call = state.calls.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
                } else {
                    (
                        StatusCode::OK,
                        Json(json!({"response": "{\"soil_moisture\": 30}", "done": true})),
                    )
                }
            }),
        )
        .with_state(state.clone());
    let base_url = spawn(app).await;

    let client = OllamaClient::new(config(&base_url)).unwrap();
    let output = client.generate(&request()).await.unwrap();

    assert_eq!(output.text, "{\"soil_moisture\": 30}");
    assert_eq!(output.status, 200);
    assert_eq!(output.model, "gemma3:4b");
    assert_eq!(state.calls.load(Ordering::SeqCst), 3);
    assert_eq!(client.stats().retry_count, 2);

    let bodies = state.bodies.lock();
    let body = &bodies[0];
    assert_eq!(body["stream"], false);
    assert_eq!(body["options"]["num_predict"], 300);
    assert!(body.get("images").is_none());
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let state = MockState::default();
    let app = Router::new()
        .route(
            "/api/generate",
            post(|State(state): State<MockState>| async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                (StatusCode::BAD_GATEWAY, "upstream down")
            }),
        )
        .with_state(state.clone());
    let base_url = spawn(app).await;

    let client = OllamaClient::new(config(&base_url)).unwrap();
    let err = client.generate(&request()).await.unwrap_err();

    assert_eq!(
        err,
        TransportError::Status {
            status: 502,
            body: "upstream down".to_string()
        }
    );
    assert_eq!(state.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_timeout_is_not_retried_and_resets_pool() {
    let state = MockState::default();
    let app = Router::new()
        .route(
            "/api/generate",
            post(|State(state): State<MockState>| async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"response": "{}"}))
            }),
        )
        .with_state(state.clone());
    let base_url = spawn(app).await;

    let client = OllamaClient::new(config(&base_url)).unwrap();
    let err = client.generate(&request()).await.unwrap_err();

    assert!(matches!(err, TransportError::Timeout(_)));
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.stats().pool_resets, 1);
    assert_eq!(client.stats().failed_requests, 1);
}

#[tokio::test]
async fn test_image_request_uses_vision_model() {
    let state = MockState::default();
    let app = Router::new()
        .route(
            "/api/generate",
            post(|State(state): State<MockState>, Json(body): Json<Value>| async move {
                state.bodies.lock().push(body);
                Json(json!({"response": "{\"image_description\": \"maíz\"}"}))
            }),
        )
        .with_state(state.clone());
    let base_url = spawn(app).await;

    let client = OllamaClient::new(config(&base_url)).unwrap();
    let output = client
        .generate(&request().with_image("aGVsbG8="))
        .await
        .unwrap();

    assert_eq!(output.model, "qwen2.5vl:3b");
    let bodies = state.bodies.lock();
    let body = &bodies[0];
    assert_eq!(body["model"], "qwen2.5vl:3b");
    assert_eq!(body["images"], json!(["aGVsbG8="]));
}

#[tokio::test]
async fn test_health_check() {
    let app = Router::new().route("/api/tags", get(|| async { Json(json!({"models": []})) }));
    let base_url = spawn(app).await;

    let client = OllamaClient::new(config(&base_url)).unwrap();
    assert!(client.health_check().await);
}

#[tokio::test]
async fn test_unreachable_backend() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = OllamaClient::new(config(&format!("http://{}", addr))).unwrap();
    assert!(!client.health_check().await);

    let err = client.generate(&request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)));
    assert!(client.stats().retry_count >= 1);
    assert_eq!(client.stats().pool_resets, 1);
}
