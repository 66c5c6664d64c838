use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cinemeld_core::error::{Classify, ErrorEnvelope, ErrorKind};

/// Any failure surfaced by a handler, reduced to its taxonomy kind.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    fn classified<E: Classify + std::fmt::Display>(e: E) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.kind.code(), error = %self.message, "request failed");
        }
        (status, Json(ErrorEnvelope::new(self.kind, self.message))).into_response()
    }
}

macro_rules! classified_from {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for AppError {
            fn from(e: $ty) -> Self {
                Self::classified(e)
            }
        })*
    };
}

classified_from!(
    cinemeld_menu::MenuError,
    cinemeld_metadata::MetadataError,
    cinemeld_sync::SyncError,
    cinemeld_playback::PlaybackError,
    cinemeld_cache::CacheError,
    cinemeld_db::DbError,
    cinemeld_core::error::HostError,
);

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        Self::new(ErrorKind::Internal, format!("database error: {e}"))
    }
}
