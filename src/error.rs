use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::config;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("bad request: {0}")]
    InputValidation(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("attestation rejected: {0}")]
    AttestationInvalid(String),
    #[error("no key release policy set, propose one")]
    PolicyMissing,
    #[error("commit receipt not yet available")]
    Pending,
    #[error("{0} not found")]
    NotFound(String),
    #[error("unable to unwrap key material")]
    Unwrap,
    #[error("stale proposal: {0}")]
    GovernanceOrdering(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl KmsError {
    fn code(&self) -> &'static str {
        match self {
            KmsError::InputValidation(_) => "InputValidation",
            KmsError::Authentication(_) => "AuthenticationError",
            KmsError::AttestationInvalid(_) => "AttestationInvalid",
            KmsError::PolicyMissing => "PolicyMissing",
            KmsError::Pending => "Pending",
            KmsError::NotFound(_) => "NotFound",
            KmsError::Unwrap => "UnwrapError",
            KmsError::GovernanceOrdering(_) => "GovernanceOrderingError",
            KmsError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for KmsError {
    fn into_response(self) -> Response {
        let status = match self {
            KmsError::InputValidation(_) => StatusCode::BAD_REQUEST,
            KmsError::Authentication(_) => StatusCode::UNAUTHORIZED,
            KmsError::AttestationInvalid(_) | KmsError::PolicyMissing => StatusCode::BAD_REQUEST,
            KmsError::Pending => StatusCode::ACCEPTED,
            KmsError::NotFound(_) => StatusCode::NOT_FOUND,
            KmsError::Unwrap | KmsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            KmsError::GovernanceOrdering(_) => StatusCode::BAD_REQUEST,
        };

        match &self {
            KmsError::Internal(err) => tracing::error!(?err, "internal error"),
            KmsError::Pending => tracing::debug!("receipt pending"),
            other => tracing::warn!(code = other.code(), "{other}"),
        }

        let message = match &self {
            // never surface internal detail to the caller
            KmsError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({ "error": { "message": message, "code": self.code() } }));

        if matches!(self, KmsError::Pending) {
            let retry = [(
                header::RETRY_AFTER,
                config::RETRY_AFTER_SECS.to_string(),
            )];
            (status, retry, body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

pub type KmsResult<T> = Result<T, KmsError>;
