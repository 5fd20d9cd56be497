// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use super::extract::ApiJson;
use crate::{
    error::ApiError,
    models::{CreateUserRequest, CreateUserResponse, ErrorResponse, ResumeUserRequest},
    protocol::ProvisionRequest,
    state::AppState,
};

/// Provision a new identity and return its time-locked secret.
#[utoipa::path(
    post,
    path = "/v1/users",
    request_body = CreateUserRequest,
    tag = "Users",
    responses(
        (status = 200, body = CreateUserResponse),
        (status = 400, description = "Invalid nickname, lock duration or avatar", body = ErrorResponse),
        (status = 502, description = "A remote collaborator failed; may carry a checkpoint", body = ErrorResponse)
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let output = state
        .provisioning
        .provision(ProvisionRequest {
            nickname: request.nickname,
            lock_hours: request.lock_hours,
            avatar_base64: request.avatar_base64,
        })
        .await?;

    Ok(Json(output.into()))
}

/// Finish the pinning and naming steps of a checkpointed provisioning call.
#[utoipa::path(
    post,
    path = "/v1/users/resume",
    request_body = ResumeUserRequest,
    tag = "Users",
    responses(
        (status = 200, body = CreateUserResponse),
        (status = 400, body = ErrorResponse),
        (status = 502, body = ErrorResponse)
    )
)]
pub async fn resume_user(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ResumeUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let output = state
        .provisioning
        .resume(request.checkpoint, request.avatar_base64.as_deref())
        .await?;

    Ok(Json(output.into()))
}
