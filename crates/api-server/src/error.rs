//! Wire form of the platform error taxonomy: `{code, message}` JSON with
//! the taxonomy's HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crewhq_core::error::PlatformError;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Newtype so handlers can return `Result<_, ApiError>` with `?` over
/// `PlatformResult` values.
pub struct ApiError(pub PlatformError);

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            // Internal invariants fail loudly.
            error!(code = self.0.code(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_passthrough() {
        let response = ApiError(PlatformError::CrossTenantAccess).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = ApiError(PlatformError::TenantRequired).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError(PlatformError::RateLimited).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
