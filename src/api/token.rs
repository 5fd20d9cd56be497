// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use super::extract::ApiJson;
use crate::{
    error::ApiError,
    models::{ErrorResponse, TokenRequest, TokenResponse},
    state::AppState,
};

/// Redeem a released secret for an access token.
///
/// Returns 425 with `retryable: true` until the beacon round is out.
#[utoipa::path(
    post,
    path = "/v1/token",
    request_body = TokenRequest,
    tag = "Token",
    responses(
        (status = 200, body = TokenResponse),
        (status = 400, body = ErrorResponse),
        (status = 403, description = "Secret does not belong to the address", body = ErrorResponse),
        (status = 425, description = "Round not released yet", body = ErrorResponse),
        (status = 502, body = ErrorResponse)
    )
)]
pub async fn create_token(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state
        .redemption
        .redeem(&request.encrypted_secret_hex, &request.public_address)
        .await?;

    Ok(Json(TokenResponse { token: token.token }))
}
