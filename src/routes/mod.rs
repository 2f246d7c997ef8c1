//! Router assembly: HTTP endpoints, WebSocket upgrade, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - CORS (allow any origin/method/headers); adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/sessions", post(http::http_post_generate))
        .route("/api/v1/sessions/:id", get(http::http_get_session))
        .route("/api/v1/sessions/:id/puzzle/answer", post(http::http_post_answer))
        .route("/api/v1/sessions/:id/puzzle/advance", post(http::http_post_advance))
        .route("/api/v1/sessions/:id/puzzle/evaluate", post(http::http_post_evaluate))
        .route("/api/v1/sessions/:id/chat", post(http::http_post_chat))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{Prompts, Settings};
    use crate::provider::testing::ScriptedProvider;

    fn test_state() -> Arc<AppState> {
        let settings = Settings { reveal_delay_ms: 0, ..Settings::default() };
        Arc::new(AppState::with_provider(Arc::new(ScriptedProvider::happy()), Prompts::default(), settings))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().method(Method::GET).uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn create_session(state: &Arc<AppState>, modules: Value) -> String {
        let response = build_router(state.clone())
            .oneshot(post("/api/v1/sessions", serde_json::json!({ "sourceText": "Water boils at 100C.", "modules": modules })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["view"], "DASHBOARD");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_provider() {
        let response = build_router(test_state()).oneshot(get_req("/api/v1/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["provider"], "scripted");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn generate_rejects_empty_text_with_400() {
        let response = build_router(test_state())
            .oneshot(post("/api/v1/sessions", serde_json::json!({ "sourceText": " ", "modules": ["summary"] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Please provide text to learn.");
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let response = build_router(test_state()).oneshot(get_req("/api/v1/sessions/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn answer_then_duplicate_is_409() {
        let state = test_state();
        let id = create_session(&state, serde_json::json!(["puzzle_learning"])).await;
        let uri = format!("/api/v1/sessions/{id}/puzzle/answer");

        let response = build_router(state.clone())
            .oneshot(post(&uri, serde_json::json!({ "questionIndex": 0, "chosenOption": "A" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["outcome"]["correct"], true);
        assert_eq!(body["puzzle"]["level1"]["userAnswers"][0], "A");

        let response = build_router(state)
            .oneshot(post(&uri, serde_json::json!({ "questionIndex": 0, "chosenOption": "B" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn premature_advance_is_409() {
        let state = test_state();
        let id = create_session(&state, serde_json::json!(["puzzle_learning"])).await;
        let response = build_router(state)
            .oneshot(post(&format!("/api/v1/sessions/{id}/puzzle/advance"), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn chat_returns_joined_reply() {
        let state = test_state();
        let id = create_session(&state, serde_json::json!(["chat"])).await;
        let response = build_router(state)
            .oneshot(post(&format!("/api/v1/sessions/{id}/chat"), serde_json::json!({ "message": "Why 100C?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["reply"], "Hello!");
        assert_eq!(body["chat"]["history"][0]["role"], "user");
    }
}
