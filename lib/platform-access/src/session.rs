//! Server-side sessions.
//!
//! A session is an opaque record keyed by a random id carried in the
//! session cookie. It starts anonymous, records the one-shot OAuth callback
//! guard, and becomes authenticated only through the session binder.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use gradebook_core::UserId;
use serde::{Deserialize, Serialize};

use crate::role::Role;
use crate::user::InvitedUser;

/// Unique identifier for a session.
///
/// Session IDs are opaque strings of 32 random bytes, base64url encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new random session ID.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Returns the session ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The authenticated user bound to a session, as seen by route handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
}

/// A server-side session.
///
/// The role is a snapshot taken at login; role changes take effect on the
/// next login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user_id: Option<UserId>,
    email: Option<String>,
    role: Option<Role>,
    name: Option<String>,
    authenticated: bool,
    /// One-shot guard for the OAuth callback.
    oauth_used: bool,
    created_at: DateTime<Utc>,
    /// Absolute expiry, fixed at creation.
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a new unauthenticated session valid for `ttl`.
    #[must_use]
    pub fn anonymous(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            user_id: None,
            email: None,
            role: None,
            name: None,
            authenticated: false,
            oauth_used: false,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Creates a new authenticated session for the user, valid for `ttl`.
    ///
    /// The one-shot callback guard is already set, so the callback that
    /// produced this session cannot be replayed with it.
    #[must_use]
    pub fn authenticated(user: &InvitedUser, ttl: Duration) -> Self {
        let mut session = Self::anonymous(ttl);
        session.user_id = Some(user.id());
        session.email = Some(user.email().to_string());
        session.role = Some(user.role());
        session.name = user.display_name().map(str::to_string);
        session.authenticated = true;
        session.oauth_used = true;
        session
    }

    /// Creates a session with all fields specified.
    ///
    /// Use this when reconstituting a session from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: SessionId,
        user_id: Option<UserId>,
        email: Option<String>,
        role: Option<Role>,
        name: Option<String>,
        authenticated: bool,
        oauth_used: bool,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            email,
            role,
            name,
            authenticated,
            oauth_used,
            created_at,
            expires_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub fn oauth_used(&self) -> bool {
        self.oauth_used
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the session has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Marks the OAuth callback as consumed for this session.
    pub fn mark_oauth_used(&mut self) {
        self.oauth_used = true;
    }

    /// Re-arms the OAuth callback for a fresh sign-in attempt.
    pub fn clear_oauth_used(&mut self) {
        self.oauth_used = false;
    }

    /// Returns the bound user if the session is authenticated and complete.
    #[must_use]
    pub fn current_user(&self) -> Option<SessionUser> {
        if !self.authenticated {
            return None;
        }
        match (self.user_id, &self.email, self.role) {
            (Some(id), Some(email), Some(role)) => Some(SessionUser {
                id,
                email: email.clone(),
                name: self.name.clone(),
                role,
            }),
            _ => None,
        }
    }
}
