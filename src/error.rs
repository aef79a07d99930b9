use axum::{http::StatusCode, response::IntoResponse};
use std::fmt::Display;

use crate::sync::SyncError;

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("DB: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Sync: {0}")]
    Sync(#[from] SyncError),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let code = match &self {
            AppErr::Bad(_) | AppErr::Sync(SyncError::EmptyKey) => StatusCode::BAD_REQUEST,
            AppErr::NotFound(_)                                => StatusCode::NOT_FOUND,
            AppErr::Conflict(_)                                => StatusCode::CONFLICT,
            AppErr::Sync(SyncError::RoomClosed)                => StatusCode::SERVICE_UNAVAILABLE,
            _                                                  => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (code, self.to_string()).into_response()
    }
}

/* ── 小助手：把任何 error 轉成 Bad ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }
