use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::vault::ServiceError;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid input: {0}")]
    InputValidation(String),
    #[error("change id not found")]
    NotFound,
    #[error("integrity check failed: {0}")]
    IntegrityMismatch(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request is no longer actionable: {0}")]
    NotActionable(String),
    #[error(
        "could not generate root token: threshold not met or the unseal keys were rotated{}",
        cancel_suffix(.cancel)
    )]
    ThresholdNotMet { cancel: Option<ServiceError> },
    #[error("could not decode root token, search for and revoke it: {0}")]
    Decode(String),
    #[error("corrupt state: {0}")]
    CorruptState(String),
    #[error("wrapping token #{position} expired or was already used, progress reset: {source}")]
    ExpiredShare {
        position: usize,
        #[source]
        source: ServiceError,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("could not generate root token: {submit}{}", cancel_suffix(.cancel))]
    CeremonyAborted {
        #[source]
        submit: ServiceError,
        cancel: Option<ServiceError>,
    },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

fn cancel_suffix(cancel: &Option<ServiceError>) -> String {
    match cancel {
        Some(err) => format!(", cancellation also failed: {err}"),
        None => String::new(),
    }
}

impl ControlError {
    /// A live root token may exist that nobody holds; an operator must find and revoke it.
    pub fn is_security_sensitive(&self) -> bool {
        matches!(self, ControlError::Decode(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::InputValidation(_) => StatusCode::BAD_REQUEST,
            ControlError::NotFound => StatusCode::NOT_FOUND,
            ControlError::IntegrityMismatch(_) => StatusCode::CONFLICT,
            ControlError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ControlError::NotActionable(_) => StatusCode::CONFLICT,
            ControlError::ExpiredShare { .. } => StatusCode::GONE,
            ControlError::ThresholdNotMet { .. } | ControlError::CeremonyAborted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ControlError::Service(_) | ControlError::Protocol(_) => StatusCode::BAD_GATEWAY,
            ControlError::Decode(_) | ControlError::CorruptState(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_security_sensitive() {
            tracing::error!(error = %self, security_sensitive = true, "root token may be orphaned");
        } else if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
