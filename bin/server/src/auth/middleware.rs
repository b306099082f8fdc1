//! Session loading and role-gating middleware for Axum.
//!
//! Layers run in this order for a gated route:
//! [`load_session`] → [`require_authenticated`] → [`require_role`] → handler.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use gradebook_platform_access::{RoleSet, Session, SessionId, SessionUser, gate};
use std::convert::Infallible;
use std::sync::Arc;
use time::Duration as TimeDuration;
use tracing::warn;

use super::AppState;
use crate::config::SessionConfig;
use crate::error::ApiError;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session";

/// The live session for this request, if any. Expired sessions are never
/// attached.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(pub Option<Session>);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Extractor for the authenticated user, set by [`require_authenticated`].
pub struct CurrentUser(pub SessionUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Returns the session id carried by the request cookie.
pub fn session_id_from(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| SessionId::from(cookie.value()))
        .filter(|id| !id.as_str().is_empty())
}

/// Builds the session cookie.
pub fn session_cookie(id: &SessionId, config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::hours(config.ttl_hours))
        .build()
}

/// Builds a cookie that clears the session cookie.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO)
        .build()
}

/// Attaches the cookie's session as [`CurrentSession`].
///
/// Missing, unknown, and expired sessions all attach `None`. A failing
/// store is logged and also reads as no session.
pub async fn load_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match session_id_from(&jar) {
        Some(id) => match state.gate.load(&id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "session lookup failed");
                None
            }
        },
        None => None,
    };
    request.extensions_mut().insert(CurrentSession(session));
    next.run(request).await
}

fn attached_session(request: &Request) -> Option<&Session> {
    request
        .extensions()
        .get::<CurrentSession>()
        .and_then(|current| current.0.as_ref())
}

/// Rejects requests without an authenticated session with 401.
pub async fn require_authenticated(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let user = gate::require_authenticated(attached_session(&request))?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Rejects sessions whose role is not in the route's allowed set with 403.
pub async fn require_role(
    State(allowed): State<RoleSet>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = gate::require_role(attached_session(&request), &allowed)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
