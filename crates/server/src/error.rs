use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use service::ServiceError;
use tracing::error;

/// Error returned by handlers; rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Service(e) => match e {
                ServiceError::InvalidOrder(_)
                | ServiceError::InvalidInput(_)
                | ServiceError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
                ServiceError::Forbidden => StatusCode::FORBIDDEN,
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::Conflict(_) => StatusCode::CONFLICT,
                ServiceError::Payment(_) => StatusCode::BAD_GATEWAY,
                ServiceError::Db(_) | ServiceError::Unexpected(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::Service(ServiceError::Payment(_)) => "Payment provider is unavailable".into(),
            ApiError::Service(ServiceError::Db(_) | ServiceError::Unexpected(_)) => {
                "Internal server error".into()
            }
            ApiError::Service(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            if let ApiError::Service(e) = &self {
                error!("Request failed: {}", e);
            }
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
