use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Request-level error taxonomy. Every failure a handler can produce maps
/// onto one of these; the HTTP boundary renders them as the standard
/// failure envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Persistence or collaborator failure not attributable to caller
    /// input. The source chain is logged, never returned to the caller.
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    message: String,
    success: bool,
    errors: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Internal(ref e) = self {
            error!(error = ?e, "request failed");
        }
        let body = ErrorBody {
            status_code: status.as_u16(),
            message: self.to_string(),
            success: false,
            errors: Vec::new(),
        };
        (status, Json(body)).into_response()
    }
}

/// Success envelope wrapping every handler payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    status_code: u16,
    data: T,
    message: String,
    success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::OK.as_u16(),
            data,
            message: message.into(),
            success: true,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            ApiError::validation("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::unauthorized("x").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_error_message_does_not_leak_source() {
        let err = ApiError::from(anyhow::anyhow!("connection refused (10.0.0.3:5432)"));
        assert_eq!(err.to_string(), "internal server error");
    }

    #[test]
    fn success_envelope_shape() {
        let body = ApiResponse::ok(serde_json::json!({"id": 1}), "done");
        let json = serde_json::to_value(&body).expect("serialize envelope");
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "done");
        assert_eq!(json["data"]["id"], 1);
    }

    #[test]
    fn failure_envelope_shape() {
        let body = ErrorBody {
            status_code: 404,
            message: "channel does not exist".into(),
            success: false,
            errors: Vec::new(),
        };
        let json = serde_json::to_value(&body).expect("serialize envelope");
        assert_eq!(json["statusCode"], 404);
        assert_eq!(json["success"], false);
        assert!(json["errors"].as_array().expect("errors array").is_empty());
    }
}
