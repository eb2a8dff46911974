//! # sso_api
//!
//! HTTP API library for the SSO service.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use sso_core::orchestrator::Authenticator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{auth, codes, devices, federation, passkeys};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
}

impl AppState {
    pub fn new(auth: Authenticator) -> Self {
        Self {
            auth: Arc::new(auth),
        }
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/code/send", post(codes::send_code_handler))
        .route("/auth/code/check", post(codes::check_code_handler))
        .route("/auth/password/forgot", post(codes::forgot_password_handler))
        .route("/auth/password/reset", post(codes::reset_password_handler))
        .route("/auth/{flow}/{provider}/start", get(federation::start_handler))
        .route(
            "/auth/{flow}/{provider}/callback",
            get(federation::callback_handler),
        )
        .route(
            "/auth/webauthn/login/begin",
            post(passkeys::login_begin_handler),
        )
        .route(
            "/auth/webauthn/login/finish",
            post(passkeys::login_finish_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route(
            "/auth/webauthn/register/begin",
            post(passkeys::register_begin_handler),
        )
        .route(
            "/auth/webauthn/register/finish",
            post(passkeys::register_finish_handler),
        )
        .route("/auth/webauthn/credentials", get(passkeys::list_handler))
        .route(
            "/auth/webauthn/credentials/{id}",
            delete(passkeys::delete_handler),
        )
        .route("/auth/devices", get(devices::list_handler))
        .route(
            "/auth/devices/{id}",
            get(devices::get_handler)
                .patch(devices::rename_handler)
                .delete(devices::delete_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
