//! Integration tests for the gateway HTTP API.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use inference_gateway::config::LimitsConfig;
use inference_gateway::test_util::{FailingFactory, FixedFactory, ScriptedEngine};
use inference_gateway::{api, AppState, MemoryBackend, Turn};

fn test_state(engine: ScriptedEngine) -> Arc<AppState> {
    state_with_limits(engine, 10, 2)
}

fn state_with_limits(
    engine: ScriptedEngine,
    queue_max_size: usize,
    max_concurrent_requests: usize,
) -> Arc<AppState> {
    let limits = LimitsConfig {
        queue_max_size,
        max_concurrent_requests,
    };
    Arc::new(AppState::new(
        &limits,
        Arc::new(MemoryBackend::new()),
        Arc::new(FixedFactory::new(Arc::new(engine))),
    ))
}

fn app(state: Arc<AppState>) -> Router {
    Router::new().nest("/v1", api::router()).with_state(state)
}

fn inference_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/inference_sse")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_status_endpoint() {
    let state = test_state(ScriptedEngine::completing(&[]));

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/v1/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["queue_size"], 0);
    assert_eq!(json["queue_max_size"], 10);
    assert_eq!(json["active_requests"], 0);
    assert_eq!(json["max_concurrent_requests"], 2);
}

#[tokio::test]
async fn test_empty_prompt_is_rejected() {
    let state = test_state(ScriptedEngine::completing(&[]));

    let response = app(state)
        .oneshot(inference_request(r#"{"prompt": ""}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn test_out_of_range_max_tokens_is_rejected() {
    let state = test_state(ScriptedEngine::completing(&[]));

    let response = app(state)
        .oneshot(inference_request(r#"{"prompt": "Hi", "max_tokens": 4096}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_queue_returns_429() {
    let state = state_with_limits(ScriptedEngine::completing(&[]), 0, 1);

    let response = app(state)
        .oneshot(inference_request(r#"{"prompt": "Hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["error"]["type"], "queue_full");
}

#[tokio::test]
async fn test_missing_model_returns_404() {
    let limits = LimitsConfig {
        queue_max_size: 10,
        max_concurrent_requests: 2,
    };
    let state = Arc::new(AppState::new(
        &limits,
        Arc::new(MemoryBackend::new()),
        Arc::new(FailingFactory::new("weights.gguf")),
    ));

    let response = app(state)
        .oneshot(inference_request(r#"{"prompt": "Hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["error"]["type"], "model_not_found");
}

#[tokio::test]
async fn test_sse_streams_fragments_and_commits_history() {
    let state = test_state(ScriptedEngine::completing(&["Hel", "lo"]));

    let response = app(state.clone())
        .oneshot(inference_request(r#"{"prompt": "Hi", "session_id": "s1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = body_string(response).await;
    assert!(body.contains("data: Hel"), "body was: {}", body);
    assert!(body.contains("data: lo"), "body was: {}", body);
    assert!(!body.contains("ERROR"), "body was: {}", body);

    // The body is only complete once generation finished, so the history
    // commit has happened by now.
    let turns = state.sessions.turns("s1").await.unwrap();
    assert_eq!(
        turns,
        vec![
            Turn("user".to_string(), "Hi".to_string()),
            Turn("assistant".to_string(), "Hello".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_sse_fragments_with_carriage_returns_survive_framing() {
    let state = test_state(ScriptedEngine::completing(&["line one\r\n", "line two"]));

    let response = app(state.clone())
        .oneshot(inference_request(r#"{"prompt": "Hi", "session_id": "s1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("data: line one"), "body was: {}", body);
    assert!(body.contains("data: line two"), "body was: {}", body);
    assert!(!body.contains("ERROR"), "body was: {}", body);
    assert!(!body.contains('\r'), "body was: {:?}", body);

    // Framing normalization is transport-only; the committed turn keeps the
    // fragment text as generated.
    let turns = state.sessions.turns("s1").await.unwrap();
    assert_eq!(turns[1].text(), "line one\r\nline two");
}

#[tokio::test]
async fn test_sse_error_frame_with_carriage_return_survives_framing() {
    let state = test_state(ScriptedEngine::failing_after(&[], "bad\r\nnews"));

    let response = app(state)
        .oneshot(inference_request(r#"{"prompt": "Hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(
        body.contains("data: ERROR: Inference failed: bad"),
        "body was: {}",
        body
    );
    assert!(body.contains("news"), "body was: {}", body);
    assert!(!body.contains('\r'), "body was: {:?}", body);
}

#[tokio::test]
async fn test_sse_mid_stream_failure_is_in_band() {
    let state = test_state(ScriptedEngine::failing_after(&["Hel"], "gpu fell off"));

    let response = app(state.clone())
        .oneshot(inference_request(r#"{"prompt": "Hi", "session_id": "s1"}"#))
        .await
        .unwrap();

    // The status was already sent when the failure happened.
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    assert!(body.contains("data: Hel"), "body was: {}", body);
    assert!(
        body.contains("data: ERROR: Inference failed: gpu fell off"),
        "body was: {}",
        body
    );

    // No assistant turn was recorded for the failed generation.
    let turns = state.sessions.turns("s1").await.unwrap();
    assert_eq!(turns, vec![Turn("user".to_string(), "Hi".to_string())]);
}

#[tokio::test]
async fn test_consecutive_requests_share_session_context() {
    let engine = ScriptedEngine::completing(&["ok"]);
    let prompts = engine.prompts();
    let state = test_state(engine);

    for prompt in ["First", "Second"] {
        let body = format!(r#"{{"prompt": "{}", "session_id": "s"}}"#, prompt);
        let response = app(state.clone())
            .oneshot(inference_request(&body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Drain the stream so the request completes before the next starts.
        body_string(response).await;
    }

    let seen = prompts.lock().unwrap();
    assert_eq!(
        seen.as_slice(),
        ["User: First\nAssistant:", "User: First\nAssistant: ok\nUser: Second\nAssistant:"]
    );
}
