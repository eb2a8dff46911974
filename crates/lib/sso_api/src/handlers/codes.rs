//! Emailed-code login and password recovery handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use sso_core::auth::captcha::CaptchaAction;
use sso_core::orchestrator::LoginCodeOutcome;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::device::ClientDevice;
use crate::models::{
    CheckCodeRequest, ForgotPasswordRequest, LoginCodeResponse, LoginRequest,
    ResetPasswordRequest, TokenResponse,
};

/// `POST /auth/code/send`: check the password, then email a login code
/// unless the device is already known.
pub async fn send_code_handler(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginCodeResponse>> {
    state
        .auth
        .verify_captcha(body.captcha.as_deref(), CaptchaAction::EmailCodeLogin)
        .await?;
    let resp = match state
        .auth
        .send_login_code(&device, &body.email, &body.password)
        .await?
    {
        LoginCodeOutcome::Issued(pair) => LoginCodeResponse {
            status: "issued",
            tokens: Some(pair.into()),
        },
        LoginCodeOutcome::CodeSent => LoginCodeResponse {
            status: "code_sent",
            tokens: None,
        },
    };
    Ok(Json(resp))
}

/// `POST /auth/code/check`
pub async fn check_code_handler(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    Json(body): Json<CheckCodeRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state
        .auth
        .check_login_code(&device, &body.email, body.code)
        .await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/password/forgot`
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> AppResult<StatusCode> {
    state
        .auth
        .verify_captcha(body.captcha.as_deref(), CaptchaAction::ForgotPassword)
        .await?;
    state.auth.send_forgot_password(&body.email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /auth/password/reset`
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    state
        .auth
        .reset_password(body.user_id, body.code, &body.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
