use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use memory_bridge::BridgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::MissingCredential => ApiError::Unauthorized(err.to_string()),
            BridgeError::EmptyTranscript | BridgeError::Config(_) => {
                ApiError::BadRequest(err.to_string())
            },
            BridgeError::Timeout { .. } => ApiError::Timeout(err.to_string()),
            BridgeError::Http { status, ref body } => {
                ApiError::Upstream(format!("memory service returned {status}: {body}"))
            },
            BridgeError::Network(_) | BridgeError::ChannelClosed | BridgeError::ChannelSendError => {
                ApiError::ServiceUnavailable(err.to_string())
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", None)
            },
            ApiError::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                Some("no_credential"),
            ),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error", None),
            ApiError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                Some("timeout"),
            ),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                param: None,
                code: code.map(String::from),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_errors_map_to_statuses() {
        let cases = [
            (BridgeError::MissingCredential, StatusCode::UNAUTHORIZED),
            (BridgeError::EmptyTranscript, StatusCode::BAD_REQUEST),
            (BridgeError::Timeout { millis: 90_000 }, StatusCode::GATEWAY_TIMEOUT),
            (BridgeError::http(503, "down"), StatusCode::BAD_GATEWAY),
            (BridgeError::ChannelClosed, StatusCode::SERVICE_UNAVAILABLE),
            (BridgeError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
