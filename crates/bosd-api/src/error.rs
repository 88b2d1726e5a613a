use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::CONFLICT, message: msg.into() }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::SERVICE_UNAVAILABLE, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<bosd_store::StoreError> for ApiError {
    fn from(e: bosd_store::StoreError) -> Self {
        match e {
            bosd_store::StoreError::NotFound { .. } => ApiError::not_found(e.to_string()),
            bosd_store::StoreError::Unavailable(_) => ApiError::unavailable(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<bosd_operator::OperatorError> for ApiError {
    fn from(e: bosd_operator::OperatorError) -> Self {
        match e {
            bosd_operator::OperatorError::Store(e) => e.into(),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<bosd_domain::DomainError> for ApiError {
    fn from(e: bosd_domain::DomainError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}
