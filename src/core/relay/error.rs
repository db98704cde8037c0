use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::api::ErrorBody;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing API key")]
    MissingCredential,

    #[error("{0}")]
    InvalidParameter(String),

    #[error("Upstream request failed: {0}")]
    UpstreamTransport(String),

    #[error("Upstream returned {status}: {detail}")]
    UpstreamProtocol { status: StatusCode, detail: String },
}

impl RelayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RelayError::InvalidParameter(message.into())
    }

    /// Status for this error. Validation failures are always 400; upstream
    /// failures are 400 too unless `forward_upstream_status` is set.
    pub fn status(&self, forward_upstream_status: bool) -> StatusCode {
        match self {
            RelayError::MissingCredential | RelayError::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::UpstreamTransport(_) if forward_upstream_status => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamProtocol { status, .. } if forward_upstream_status => *status,
            RelayError::UpstreamTransport(_) | RelayError::UpstreamProtocol { .. } => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    pub fn into_response_with(self, forward_upstream_status: bool) -> Response {
        let status = self.status(forward_upstream_status);
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}
