//! Client-facing error taxonomy for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use service_core::observability::StepStack;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or invalid request fields.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    /// The bank revoked the session behind an access grant.
    #[error("{0}")]
    Forbidden(String),

    /// Company, token or payment absent (or not owned by the caller).
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AccountNotFound(String),

    /// The bank refused the authorization code.
    #[error("{0}")]
    CodeRejected(String),

    /// The bank declined the operation. Carries the classified reason.
    #[error("{0}")]
    UpstreamRejected(String),

    /// Transport failure or an unclassified upstream status.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// Upstream JSON did not match the expected schema.
    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Persistence(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::AccountNotFound(_) => StatusCode::NOT_FOUND,
            Self::CodeRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UpstreamRejected(_)
            | Self::UpstreamUnavailable(_)
            | Self::Decode(_)
            | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Prefix the message while keeping the classification.
    /// `AccountNotFound` is passed through unchanged: its message already names
    /// the missing account and is returned to the caller as is.
    pub fn context(self, prefix: &str) -> Self {
        let wrap = |message: String| format!("{}: {}", prefix, message);
        match self {
            Self::Validation(m) => Self::Validation(wrap(m)),
            Self::Unauthorized(m) => Self::Unauthorized(wrap(m)),
            Self::Forbidden(m) => Self::Forbidden(wrap(m)),
            Self::NotFound(m) => Self::NotFound(wrap(m)),
            Self::AccountNotFound(m) => Self::AccountNotFound(m),
            Self::CodeRejected(m) => Self::CodeRejected(wrap(m)),
            Self::UpstreamRejected(m) => Self::UpstreamRejected(wrap(m)),
            Self::UpstreamUnavailable(m) => Self::UpstreamUnavailable(wrap(m)),
            Self::Decode(m) => Self::Decode(wrap(m)),
            Self::Persistence(m) => Self::Persistence(wrap(m)),
        }
    }
}

/// Used for extractor rejections that are not routed through a handler's own
/// step stack.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut steps = StepStack::new("request.rejected");
        ApiError::fail(&mut steps, self).into_response()
    }
}

impl From<AppError> for GatewayError {
    fn from(err: AppError) -> Self {
        GatewayError::Persistence(err.to_string())
    }
}

/// Error response rendered as `{ "error": ..., "traceId": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    trace_id: String,
}

impl ApiError {
    /// Record `err` on the current step of the request and build the response.
    pub fn fail(steps: &mut StepStack, err: GatewayError) -> Self {
        let trace_id = steps.trace_id();
        let err = steps.fail(err);

        if err.status().is_server_error() {
            tracing::error!(error = %err, trace_id = %trace_id, "Request failed");
        }

        Self {
            status: err.status(),
            error: err.to_string(),
            trace_id,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ErrorResponse {
            error: String,
            trace_id: String,
        }

        (
            self.status,
            Json(ErrorResponse {
                error: self.error,
                trace_id: self.trace_id,
            }),
        )
            .into_response()
    }
}
