use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use cinemeld_server::config::ServerConfig;
use cinemeld_server::routes::build_router;
use cinemeld_server::state::{AppState, HostRequest, ServerEvent};
use serde_json::{Value, json};

fn test_config() -> ServerConfig {
    ServerConfig {
        db_path: ":memory:".into(),
        concurrency: Some(2),
        reply_timeout: Duration::from_secs(5),
        // Nothing listens here; provider calls fail fast.
        imdb_base: "http://127.0.0.1:9".into(),
        ..Default::default()
    }
}

/// Create app state over an in-memory SQLite database.
async fn test_state() -> AppState {
    let pool = cinemeld_db::open(":memory:").await.unwrap();
    cinemeld_server::build_state(&test_config(), pool).await.unwrap()
}

async fn test_app() -> (TestServer, AppState) {
    let state = test_state().await;
    let server = TestServer::new(build_router(state.clone())).unwrap();
    (server, state)
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap()
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let (server, _) = test_app().await;
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let pool = cinemeld_db::open(":memory:").await.unwrap();
    cinemeld_db::migrate::run(&pool).await.unwrap();
    cinemeld_db::migrate::run(&pool).await.unwrap();
}

#[tokio::test]
async fn unknown_action_is_a_client_error() {
    let (server, _) = test_app().await;
    let resp = server.post("/api/v1/actions/launchRocket").json(&json!({})).await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(error_code(&body), "client");
    assert!(body["error"]["message"].as_str().unwrap().contains("launchRocket"));
}

#[tokio::test]
async fn invalid_menu_request_uses_the_error_envelope() {
    let (server, _) = test_app().await;
    let resp = server
        .post("/api/v1/actions/menu")
        .json(&json!({ "media": "movie", "intent": "bogus" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(error_code(&body), "client");
    assert!(body["error"]["details"].is_object());
}

#[tokio::test]
async fn account_menus_need_trakt() {
    let (server, _) = test_app().await;
    let resp = server.post("/api/v1/actions/moviesRated").json(&json!({})).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = resp.json();
    assert_eq!(error_code(&body), "authentication");

    let resp = server
        .post("/api/v1/actions/traktMark")
        .json(&json!({ "media": "movie", "imdb": "tt0133093", "op": "watched" }))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn play_requires_a_url() {
    let (server, state) = test_app().await;
    let resp = server
        .post("/api/v1/actions/play")
        .json(&json!({ "media": "movie", "imdb": "tt0133093" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn cache_clear_acknowledges() {
    let (server, _) = test_app().await;
    let resp = server.post("/api/v1/actions/cacheClear").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["kind"], "done");
}

#[tokio::test]
async fn player_event_for_unknown_session_is_404() {
    let (server, _) = test_app().await;
    let resp = server
        .post("/api/v1/player/nope/event")
        .json(&json!({ "event": { "type": "paused" } }))
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
    let body: Value = resp.json();
    assert_eq!(error_code(&body), "not_found");
}

#[tokio::test]
async fn dialog_reply_for_unknown_request_is_404() {
    let (server, _) = test_app().await;
    let resp = server.post("/api/v1/dialog/41").json(&json!({ "value": true })).await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dialog_questions_are_answered_over_http() {
    let (server, state) = test_app().await;
    let mut events = state.bridge.subscribe();

    let dialog = state.host.dialog.clone();
    let asking = tokio::spawn(async move { dialog.confirm("Resume", "Resume from 12:00?").await });

    let id = loop {
        if let ServerEvent::Request { id, request } = events.recv().await.unwrap() {
            assert!(matches!(request, HostRequest::Confirm { .. }));
            break id;
        }
    };
    let resp = server.post(&format!("/api/v1/dialog/{id}")).json(&json!({ "value": true })).await;
    resp.assert_status(StatusCode::NO_CONTENT);
    assert!(asking.await.unwrap());
}

#[tokio::test]
async fn progress_windows_can_be_cancelled() {
    let (server, state) = test_app().await;
    let id = state.host.dialog.progress_open("Loading", false).await;
    assert!(!state.host.dialog.progress_cancelled(id).await);
    server
        .post(&format!("/api/v1/progress/{id}/cancel"))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    assert!(state.host.dialog.progress_cancelled(id).await);
}
