//! Authentication routes for sign-in, callback, logout, and status.
//!
//! Browser-facing routes (`/auth/google*`, non-JSON logout) answer with
//! redirects to the client; failures carry a reason code in the query
//! string, never error text.

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, header::ACCEPT},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use gradebook_platform_access::{AuthStatus, IdentityProvider, Session};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    AppState,
    middleware::{CurrentSession, CurrentUser, removal_cookie, session_cookie, session_id_from},
};
use crate::error::ApiError;

/// Query parameters for the OAuth callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
}

/// Redirects the browser to Google.
///
/// Clears the current session's one-shot callback flag so a fresh
/// sign-in can complete.
pub async fn google_start(
    State(state): State<Arc<AppState>>,
    CurrentSession(current): CurrentSession,
    jar: CookieJar,
) -> Response {
    let auth_url = match state.exchange.initiate() {
        Ok(url) => url,
        Err(report) => {
            error!(error = %report, "failed to build authorization URL");
            return Redirect::to(&state.front_link("/login?error=init_failed")).into_response();
        }
    };

    let mut session = current.unwrap_or_else(|| Session::anonymous(state.session_config.ttl()));
    session.clear_oauth_used();
    if let Err(err) = state.stores.sessions.save(&session).await {
        error!(error = %err, "failed to persist pre-authentication session");
        return Redirect::to(&state.front_link("/login?error=init_failed")).into_response();
    }

    info!(provider = state.exchange.provider_name(), "redirecting to identity provider");
    let cookie = session_cookie(session.id(), &state.session_config);
    (jar.add(cookie), Redirect::to(&auth_url)).into_response()
}

/// Handles the provider callback.
///
/// Success lands on the client dashboard with a fresh session cookie;
/// every failure lands on the login page with `?error=<reason>`.
pub async fn google_callback(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
    CurrentSession(current): CurrentSession,
    jar: CookieJar,
) -> Response {
    // A malformed query counts as a callback without a usable code.
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            warn!(error = %rejection, "malformed callback query");
            CallbackQuery::default()
        }
    };
    if let Some(provider_error) = &query.error {
        warn!(error = %provider_error, "provider returned an error to the callback");
    }

    let mut session = current.unwrap_or_else(|| Session::anonymous(state.session_config.ttl()));
    match state.binder.complete(&mut session, query.code.as_deref()).await {
        Ok(bound) => {
            let cookie = session_cookie(bound.session.id(), &state.session_config);
            (jar.add(cookie), Redirect::to(&state.front_link("/dashboard"))).into_response()
        }
        Err(err) => {
            let reason = err.reason_code();
            warn!(reason, error = %err, "sign-in failed");
            // Keep the cookie so the consumed callback flag sticks to this browser.
            let cookie = session_cookie(session.id(), &state.session_config);
            let target = state.front_link(&format!("/login?error={reason}"));
            (jar.add(cookie), Redirect::to(&target)).into_response()
        }
    }
}

/// Destroys the session and clears the cookie.
///
/// Answers JSON when the client accepts it, otherwise redirects to the
/// login page.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session_id = session_id_from(&jar);
    state.gate.logout(session_id.as_ref()).await?;
    let jar = jar.add(removal_cookie());

    let wants_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("json"));

    if wants_json {
        Ok((
            jar,
            Json(json!({ "success": true, "message": "Logged out successfully" })),
        )
            .into_response())
    } else {
        Ok((jar, Redirect::to(&state.front_link("/login?message=logged_out"))).into_response())
    }
}

/// Reports whether the caller is signed in. Never fails.
pub async fn status(CurrentSession(current): CurrentSession) -> Json<AuthStatus> {
    Json(AuthStatus::of(current.as_ref()))
}

/// Live provider profile of the signed-in user.
#[derive(Debug, Serialize)]
pub struct ProviderProfile {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Fetches the caller's profile from the provider with a fresh access token.
pub async fn provider_profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ProviderProfile>, ApiError> {
    let mut record = state
        .stores
        .identities
        .find_by_id(user.id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    let access_token = state.refresh.ensure_fresh_token(&mut record).await?;
    let identity = state
        .provider
        .user_info(&access_token)
        .await
        .map_err(|report| ApiError::BadGateway {
            details: report.to_string(),
        })?;

    Ok(Json(ProviderProfile {
        email: identity.email,
        name: identity.name,
        picture: identity.picture,
    }))
}
