//! External identity provider handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use sso_core::federation::Flow;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::device::ClientDevice;
use crate::models::{AuthorizationUrlResponse, CallbackQuery, CallbackResponse};

fn parse_flow(flow: &str) -> Result<Flow, AppError> {
    flow.parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown flow: {flow}")))
}

/// `GET /auth/{flow}/{provider}/start`: authorization URL with a signed state.
pub async fn start_handler(
    State(state): State<AppState>,
    Path((flow, provider)): Path<(String, String)>,
) -> AppResult<Json<AuthorizationUrlResponse>> {
    let url = state
        .auth
        .authorization_url(&provider, parse_flow(&flow)?)
        .await?;
    Ok(Json(AuthorizationUrlResponse { url }))
}

/// `GET /auth/{flow}/{provider}/callback?code=…&state=…`
pub async fn callback_handler(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    Path((flow, provider)): Path<(String, String)>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Json<CallbackResponse>> {
    let login = state
        .auth
        .handle_callback(
            &device,
            &provider,
            parse_flow(&flow)?,
            &query.code,
            &query.state,
        )
        .await?;
    Ok(Json(CallbackResponse {
        tokens: login.tokens.into(),
        redirect_url: login.success_url,
    }))
}
