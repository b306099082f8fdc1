//! Authorization gate: authenticate, then authorize by role.
//!
//! The checks are plain functions over the current session so any web
//! layer can mount them as guards. [`AuthorizationGate`] owns session
//! loading, logout, and the status query.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{GateError, StoreError};
use crate::role::RoleSet;
use crate::session::{Session, SessionId, SessionUser};
use crate::store::SessionStore;

/// Passes iff the session is authenticated and unexpired.
///
/// # Errors
///
/// Returns `Unauthenticated` otherwise.
pub fn require_authenticated(session: Option<&Session>) -> Result<SessionUser, GateError> {
    session
        .filter(|s| !s.is_expired())
        .and_then(Session::current_user)
        .ok_or(GateError::Unauthenticated)
}

/// Passes iff the session is authenticated and its role is in `allowed`.
///
/// Authentication is checked first, so an unauthenticated session never
/// has its role evaluated.
///
/// # Errors
///
/// Returns `Unauthenticated` or `Forbidden`.
pub fn require_role(session: Option<&Session>, allowed: &RoleSet) -> Result<SessionUser, GateError> {
    let user = require_authenticated(session)?;
    if allowed.contains(user.role) {
        Ok(user)
    } else {
        debug!(user_id = %user.id, role = %user.role, allowed = %allowed, "role check failed");
        Err(GateError::Forbidden {
            role: user.role,
            allowed: allowed.clone(),
        })
    }
}

/// Tri-state authentication status for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub user: Option<SessionUser>,
}

impl AuthStatus {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            user: None,
        }
    }

    #[must_use]
    pub fn of(session: Option<&Session>) -> Self {
        match require_authenticated(session) {
            Ok(user) => Self {
                authenticated: true,
                user: Some(user),
            },
            Err(_) => Self::anonymous(),
        }
    }
}

/// Session-backed gate operations.
#[derive(Clone)]
pub struct AuthorizationGate {
    sessions: Arc<dyn SessionStore>,
}

impl AuthorizationGate {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Loads the session with this id, destroying it if it has expired.
    ///
    /// # Errors
    ///
    /// Returns the store error if the lookup fails.
    pub async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let Some(session) = self.sessions.load(id).await? else {
            return Ok(None);
        };
        if session.is_expired_at(Utc::now()) {
            debug!(session_id = %id, "dropping expired session");
            self.sessions.destroy(id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Answers the status query. Never fails: store errors read as
    /// unauthenticated.
    pub async fn status(&self, id: Option<&SessionId>) -> AuthStatus {
        let Some(id) = id else {
            return AuthStatus::anonymous();
        };
        match self.load(id).await {
            Ok(session) => AuthStatus::of(session.as_ref()),
            Err(err) => {
                warn!(error = %err, "session lookup failed during status check");
                AuthStatus::anonymous()
            }
        }
    }

    /// Destroys the session. Succeeds if there is none.
    ///
    /// # Errors
    ///
    /// Returns the store error if removal fails.
    pub async fn logout(&self, id: Option<&SessionId>) -> Result<(), StoreError> {
        if let Some(id) = id {
            self.sessions.destroy(id).await?;
            info!("session destroyed on logout");
        }
        Ok(())
    }
}
