//! Device management handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use sso_core::models::session::Device;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::RenameDeviceRequest;

/// `GET /auth/devices`
pub async fn list_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<Vec<Device>>> {
    Ok(Json(state.auth.list_devices(claims.sub).await?))
}

/// `GET /auth/devices/{id}`
pub async fn get_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> AppResult<Json<Device>> {
    Ok(Json(state.auth.get_device(claims.sub, &id).await?))
}

/// `PATCH /auth/devices/{id}`
pub async fn rename_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(body): Json<RenameDeviceRequest>,
) -> AppResult<StatusCode> {
    state.auth.rename_device(claims.sub, &id, &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /auth/devices/{id}`: revokes the device's sessions.
pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.auth.delete_device(claims.sub, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
