// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with optional feature status.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests.
    pub status: String,
    /// Whether ENS subdomain registration is configured.
    pub naming: bool,
    /// Whether avatar pinning is configured.
    pub pinning: bool,
}

/// Health check endpoint handler.
///
/// Collaborators are not probed; a remote outage shows up as a 502 on the
/// request that needed it.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        naming: state.naming_enabled,
        pinning: state.pinning_enabled,
    })
}
