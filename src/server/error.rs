use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// API错误类型
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, error: anyhow::anyhow!(msg.into()) }
    }

    pub fn unauthorized() -> Self {
        Self { status: StatusCode::UNAUTHORIZED, error: anyhow::anyhow!("invalid token") }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            return (self.status, format!("Something went wrong: {}", self.error)).into_response();
        }
        (self.status, self.error.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, error: err.into() }
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
