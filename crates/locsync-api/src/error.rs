use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use locsync_core::LocSyncError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] LocSyncError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Core(err) => match err {
                LocSyncError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
                LocSyncError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
                LocSyncError::EntryNotFound(_) | LocSyncError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, self.to_string())
                }
                LocSyncError::Cms { status, .. } if *status >= 400 && *status < 500 => (
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                    self.to_string(),
                ),
                LocSyncError::Translator(_)
                | LocSyncError::CmsTransient(_)
                | LocSyncError::Http(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
