//! Maps `CoreError` onto the HTTP status codes and JSON body spec §7
//! defines for the RPC and status surfaces.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use marcus_core::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::Conflict { .. } => StatusCode::CONFLICT,
            CoreError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::ExternalFailure { .. } => StatusCode::BAD_GATEWAY,
            CoreError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = self.0.to_response();
        let mut response = (status, Json(body)).into_response();
        if let CoreError::RateLimited { retry_after_seconds } = &self.0 {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn not_found_maps_to_404() {
        let resp = ApiError(CoreError::not_found("x")).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rate_limited_carries_retry_after_header() {
        let resp = ApiError(CoreError::RateLimited { retry_after_seconds: 5 }).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "5");
    }

    #[test]
    fn invalid_transition_maps_to_422() {
        let resp = ApiError(CoreError::invalid_transition("x")).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
