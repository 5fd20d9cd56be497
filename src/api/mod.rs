// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{
        CreateUserRequest, CreateUserResponse, ErrorResponse, ResumeUserRequest, TokenRequest,
        TokenResponse,
    },
    protocol::{ProvisionCheckpoint, ProvisionStage},
    state::AppState,
};

pub mod extract;
pub mod health;
pub mod token;
pub mod users;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/users", post(users::create_user))
        .route("/users/resume", post(users::resume_user))
        .route("/token", post(token::create_token));

    // Paths of the first release, kept for existing clients.
    let legacy_routes = Router::new()
        .route("/users", post(users::create_user))
        .route("/token", post(token::create_token));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", v1_routes)
        .merge(legacy_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        users::create_user,
        users::resume_user,
        token::create_token,
        health::health
    ),
    components(
        schemas(
            CreateUserRequest,
            CreateUserResponse,
            ResumeUserRequest,
            TokenRequest,
            TokenResponse,
            ErrorResponse,
            ProvisionCheckpoint,
            ProvisionStage,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Users", description = "Identity provisioning"),
        (name = "Token", description = "Secret redemption"),
        (name = "Health", description = "Service status")
    )
)]
struct ApiDoc;
