//! Student profile routes.

use axum::{Json, extract::State};
use gradebook_platform_access::StudentProfile;
use std::sync::Arc;

use crate::auth::{AppState, CurrentUser};
use crate::error::ApiError;

/// `GET /api/students`: all student profiles.
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StudentProfile>>, ApiError> {
    Ok(Json(state.stores.profiles.list().await?))
}

/// `GET /api/students/me/profile`: the profile linked to the caller.
pub async fn my_profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<StudentProfile>, ApiError> {
    state
        .stores
        .profiles
        .find_by_user(user.id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            message: "No student profile is linked to this user".to_string(),
        })
}
