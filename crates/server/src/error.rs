use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use trato_core::negotiation::store::StoreError;
use trato_core::{NegotiationError, ServiceError};

/// Wire-level error: the core taxonomy mapped onto HTTP statuses, plus the
/// interface-only conditions (authentication, malformed headers).
#[derive(Clone, Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub guidance: &'static str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
    guidance: &'a str,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            message: "caller identity is missing".to_string(),
            guidance: "Supply the authenticated account id in the X-Account-Id header.",
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
            guidance: "Correct the request and try again.",
        }
    }

    pub fn invalid_change_data(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "INVALID_CHANGE_DATA",
            message: message.into(),
            guidance: "Correct the change items and resubmit.",
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Negotiation(inner) => {
                let status = match &inner {
                    NegotiationError::VersionConflict { .. }
                    | NegotiationError::InvalidState { .. }
                    | NegotiationError::NotPendingChange(_)
                    | NegotiationError::NotPendingAcceptance(_) => StatusCode::CONFLICT,
                    NegotiationError::SelfDecision(_) => StatusCode::FORBIDDEN,
                    NegotiationError::InvalidChangeData(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    NegotiationError::NotFound(_) => StatusCode::NOT_FOUND,
                };
                Self {
                    status,
                    code: inner.code(),
                    guidance: inner.guidance(),
                    message: inner.to_string(),
                }
            }
            ServiceError::Store(StoreError::VersionConflict(quote_id)) => Self {
                status: StatusCode::CONFLICT,
                code: "VERSION_CONFLICT",
                message: format!("version conflict while committing quote {}", quote_id.0),
                guidance:
                    "The quote changed underneath you. Re-fetch it and retry with the current version.",
            },
            ServiceError::Store(inner) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "SERVER_ERROR",
                message: inner.to_string(),
                guidance: "A storage error interrupted the call. It is safe to retry.",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body =
            ErrorBody { error: &self.message, code: self.code, guidance: self.guidance };
        (self.status, Json(body)).into_response()
    }
}
