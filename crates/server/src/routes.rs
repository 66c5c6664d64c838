use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use cinemeld_core::host::PlayerEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::actions::{self, ActionReply, Params};
use crate::error::AppError;
use crate::state::{AppState, PlayerStatus, ServerEvent};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/actions/{action}", post(run_action))
        .route("/player/{session}", get(get_session))
        .route("/player/{session}/event", post(player_event))
        .route("/dialog/{id}", post(dialog_reply))
        .route("/progress/{id}/cancel", post(cancel_progress))
        .route("/events", get(sse_events))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    sessions: usize,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1").execute(&state.db).await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.sessions.len(),
    }))
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

async fn run_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: Option<Json<Params>>,
) -> Result<Json<ActionReply>, AppError> {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    Ok(Json(actions::dispatch(&state, &action, params).await?))
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PlayerEventBody {
    event: PlayerEvent,
    /// Player state at the time of the event.
    status: Option<PlayerStatus>,
}

#[derive(Serialize)]
struct SessionResponse {
    session: String,
    state: &'static str,
    title: String,
}

async fn player_event(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(body): Json<PlayerEventBody>,
) -> Result<Json<SessionResponse>, AppError> {
    if let Some(status) = body.status {
        state.bridge.update_status(status);
    }
    let controller = state
        .sessions
        .get(&session)
        .ok_or_else(|| AppError::not_found(format!("no playback session {session}")))?;
    controller.handle_event(body.event).await;
    Ok(Json(SessionResponse {
        state: controller.state().as_str(),
        title: controller.request().title.clone(),
        session,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let controller = state
        .sessions
        .get(&session)
        .ok_or_else(|| AppError::not_found(format!("no playback session {session}")))?;
    Ok(Json(SessionResponse {
        state: controller.state().as_str(),
        title: controller.request().title.clone(),
        session,
    }))
}

// ---------------------------------------------------------------------------
// Dialog replies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DialogReply {
    value: Value,
}

async fn dialog_reply(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(reply): Json<DialogReply>,
) -> Result<axum::http::StatusCode, AppError> {
    if state.bridge.answer(id, reply.value) {
        Ok(axum::http::StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("no open request {id}")))
    }
}

async fn cancel_progress(State(state): State<AppState>, Path(id): Path<u64>) -> axum::http::StatusCode {
    state.bridge.cancel_progress(id);
    axum::http::StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

async fn sse_events(
    State(state): State<AppState>,
) -> axum::response::Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    use axum::response::sse::Event;
    use std::time::Duration;

    let mut rx = state.bridge.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(evt) => {
                    let event_type = ServerEvent::name(&evt);
                    if let Ok(data) = serde_json::to_string(&evt) {
                        yield Ok(Event::default().event(event_type).data(data));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default()
                        .event("error")
                        .data(format!(r#"{{"lagged":{n}}}"#)));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    axum::response::Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
