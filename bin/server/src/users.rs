//! Admin routes for invitations and user management.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use gradebook_core::UserId;
use gradebook_platform_access::{InviteRequest, InvitedUser};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::auth::AppState;
use crate::error::ApiError;

/// Response body for a created invitation.
#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub success: bool,
    pub message: String,
    pub user: InvitedUser,
}

/// `POST /api/users`: invites an email with a role.
pub async fn invite(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InviteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InviteResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest {
        message: rejection.body_text(),
    })?;

    let user = state.admin.invite(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            success: true,
            message: format!("Invitation sent to {}", user.email()),
            user,
        }),
    ))
}

/// `GET /api/users`: every user, newest first.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<InvitedUser>>, ApiError> {
    Ok(Json(state.admin.list().await?))
}

/// `DELETE /api/users/{id}`: removes a user and revokes their sessions.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // An id that cannot exist is simply not found.
    let id: UserId = id.parse().map_err(|_| ApiError::NotFound {
        message: "User not found".to_string(),
    })?;

    let deleted = state.admin.delete(id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "User deleted",
        "revokedSessions": deleted.revoked_sessions,
    })))
}
