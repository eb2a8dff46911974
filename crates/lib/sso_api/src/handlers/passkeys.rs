//! WebAuthn handlers.
//!
//! Finish endpoints take the authenticator response as the raw request body
//! and hand it to the ceremony manager untouched.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use sso_core::auth::captcha::CaptchaAction;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::device::ClientDevice;
use crate::models::{EmailQuery, PasskeyLoginRequest, PasskeySummary, TokenResponse};

/// `POST /auth/webauthn/register/begin`
pub async fn register_begin_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<serde_json::Value>> {
    let challenge = state.auth.begin_passkey_registration(claims.sub).await?;
    Ok(Json(challenge))
}

/// `POST /auth/webauthn/register/finish`
pub async fn register_finish_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<PasskeySummary>)> {
    let credential = state
        .auth
        .finish_passkey_registration(claims.sub, &body)
        .await?;
    Ok((StatusCode::CREATED, Json(credential.into())))
}

/// `POST /auth/webauthn/login/begin`
pub async fn login_begin_handler(
    State(state): State<AppState>,
    Json(body): Json<PasskeyLoginRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .auth
        .verify_captcha(body.captcha.as_deref(), CaptchaAction::PasskeyLogin)
        .await?;
    let challenge = state.auth.begin_passkey_login(&body.email).await?;
    Ok(Json(challenge))
}

/// `POST /auth/webauthn/login/finish?email=…`
pub async fn login_finish_handler(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    Query(query): Query<EmailQuery>,
    body: Bytes,
) -> AppResult<Json<TokenResponse>> {
    let pair = state
        .auth
        .finish_passkey_login(&device, &query.email, &body)
        .await?;
    Ok(Json(pair.into()))
}

/// `GET /auth/webauthn/credentials`
pub async fn list_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<Vec<PasskeySummary>>> {
    let credentials = state.auth.list_passkeys(claims.sub).await?;
    Ok(Json(credentials.into_iter().map(Into::into).collect()))
}

/// `DELETE /auth/webauthn/credentials/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.auth.delete_passkey(claims.sub, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
