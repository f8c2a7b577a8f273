use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::Error as CoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Core(error) => match error {
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                CoreError::AlreadyResolved(_) => StatusCode::CONFLICT,
                CoreError::StateExpired(_) => StatusCode::GONE,
                CoreError::UnsupportedOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                CoreError::Connection(_) | CoreError::Http(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_expected_status() {
        let cases = [
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CoreError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::AlreadyResolved("x".into()), StatusCode::CONFLICT),
            (CoreError::StateExpired("x".into()), StatusCode::GONE),
            (
                CoreError::UnsupportedOperation("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CoreError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (CoreError::Connection("x".into()), StatusCode::BAD_GATEWAY),
            (
                CoreError::Database("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(AppError::Core(error).status(), expected);
        }
    }
}
