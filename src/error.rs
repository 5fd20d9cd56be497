// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP-facing errors.
//!
//! Bodies look like:
//!
//! ```json
//! {"error": "...", "error_code": "too_early", "retryable": true}
//! ```
//!
//! Provisioning failures that happened after the secret was locked also
//! carry a `checkpoint` the caller can send to `/v1/users/resume`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crate::models::ErrorResponse;
use crate::protocol::{CardError, ErrorKind, ProvisionCheckpoint, ProvisionError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error_code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub checkpoint: Option<ProvisionCheckpoint>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code,
            message: message.into(),
            retryable: false,
            checkpoint: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::InvalidInput.as_str(),
            message,
        )
    }

    fn from_kind(kind: ErrorKind, message: String) -> Self {
        Self {
            retryable: kind.is_retryable(),
            ..Self::new(status_for(kind), kind.as_str(), message)
        }
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::AddressMismatch => StatusCode::FORBIDDEN,
        ErrorKind::TooEarly => StatusCode::TOO_EARLY,
        ErrorKind::Generation => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Transport
        | ErrorKind::Protocol
        | ErrorKind::Decode
        | ErrorKind::AuxiliaryFailure => StatusCode::BAD_GATEWAY,
    }
}

impl From<CardError> for ApiError {
    fn from(err: CardError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}

/// Unreadable or mistyped request bodies.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        Self {
            checkpoint: err.checkpoint,
            ..Self::from_kind(kind, message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            error_code: self.error_code.to_string(),
            retryable: self.retryable,
            checkpoint: self.checkpoint,
        });
        (self.status, body).into_response()
    }
}
