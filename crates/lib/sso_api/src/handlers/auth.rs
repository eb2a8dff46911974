//! Password login, refresh, logout and current-user handlers.

use axum::Extension;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use sso_core::auth::captcha::CaptchaAction;
use sso_core::models::auth::User;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::{AuthenticatedUser, bearer_token};
use crate::middleware::device::ClientDevice;
use crate::models::{LoginRequest, RefreshRequest, TokenResponse};

/// `POST /auth/login`: authenticate with email and password.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    state
        .auth
        .verify_captcha(body.captcha.as_deref(), CaptchaAction::PasswordLogin)
        .await?;
    let pair = state
        .auth
        .authenticate(&device, &body.email, &body.password)
        .await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/refresh`: rotate a refresh token bound to the calling device.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state.auth.refresh(&device, &body.refresh_token).await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/logout`: revoke every session of the caller.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<StatusCode> {
    state.auth.logout(claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /auth/me`
pub async fn me_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<User>> {
    let token = bearer_token(&headers)?;
    let user = state.auth.current_user(token).await?;
    Ok(Json(user))
}
