use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use p2pshare_agent::AgentError;
use p2pshare_directory::DirectoryError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by every handler, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn bad_gateway<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::InvalidPeer(_) => Self::bad_request(err.to_string()),
            DirectoryError::ServiceStopped => Self::service_unavailable(err.to_string()),
            DirectoryError::InvalidConfig(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let message = err.to_string();
        match err {
            AgentError::DuplicateTransfer(_) | AgentError::NameInFlight(_) => {
                Self::conflict(message)
            }
            AgentError::UnknownPeer(_) | AgentError::UnknownFile(_) => Self::not_found(message),
            AgentError::InvalidFileName(_) | AgentError::Url(_) => Self::bad_request(message),
            AgentError::NotRegistered => Self::service_unavailable(message),
            AgentError::Transport(_) | AgentError::Status { .. } | AgentError::Incomplete { .. } => {
                Self::bad_gateway(message)
            }
            AgentError::Io(_) | AgentError::InvalidConfig(_) => Self::internal(message),
        }
    }
}
