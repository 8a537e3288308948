use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RateLimited { retry_after } => {
                let body = Json(json!({
                    "detail": "Rate limit exceeded. Try again later.",
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert("retry-after", val);
                }
                response
            }
            AppError::Validation(msg) => {
                let body = Json(json!({ "detail": msg }));
                (StatusCode::UNPROCESSABLE_ENTITY, body).into_response()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                let body = Json(json!({ "detail": "internal server error" }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}
