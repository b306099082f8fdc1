//! Invited user (identity record) and the login-time profile merge.
//!
//! An [`InvitedUser`] is created by an administrator before any login is
//! possible. The OAuth callback activates it and merges the provider
//! profile in; the token refresh guard renews its access token.

use chrono::{DateTime, Utc};
use gradebook_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseEnumError;
use crate::role::Role;

/// Normalizes an email address for use as the invitation key.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Lifecycle state of an invited user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// Invited by an administrator, never signed in.
    Invited,
    /// Signed in at least once.
    Active,
}

impl UserStatus {
    /// Returns the canonical wire/storage name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invited => "INVITED",
            Self::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVITED" => Ok(Self::Invited),
            "ACTIVE" => Ok(Self::Active),
            other => Err(ParseEnumError {
                kind: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Fields merged into an invited user on a successful OAuth callback.
///
/// Optional fields left as `None` keep whatever is already stored. In
/// particular a missing `refresh_token_encrypted` never erases a stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// Identity provider name (`google`).
    pub provider: String,
    /// Stable subject id at the provider.
    pub provider_subject_id: Option<String>,
    /// Display name reported by the provider.
    pub display_name: Option<String>,
    /// Avatar URL reported by the provider.
    pub picture: Option<String>,
    /// Fresh access token.
    pub access_token: String,
    /// Refresh token, already encrypted by the credential cipher.
    pub refresh_token_encrypted: Option<String>,
    /// Access token expiry, epoch milliseconds.
    pub token_expiry: i64,
}

/// An allow-listed account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitedUser {
    id: UserId,
    email: String,
    role: Role,
    status: UserStatus,
    provider: Option<String>,
    provider_subject_id: Option<String>,
    display_name: Option<String>,
    picture: Option<String>,
    /// Process-local cache; never persisted or serialized.
    #[serde(skip)]
    access_token: Option<String>,
    #[serde(skip)]
    refresh_token_encrypted: Option<String>,
    /// Epoch milliseconds; 0 means expired.
    #[serde(skip)]
    token_expiry: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvitedUser {
    /// Creates a fresh invitation for the given email and role.
    #[must_use]
    pub fn invite(email: &str, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            email: normalize_email(email),
            role,
            status: UserStatus::Invited,
            provider: None,
            provider_subject_id: None,
            display_name: None,
            picture: None,
            access_token: None,
            refresh_token_encrypted: None,
            token_expiry: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a user with all fields specified.
    ///
    /// Use this when reconstituting a user from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: UserId,
        email: String,
        role: Role,
        status: UserStatus,
        provider: Option<String>,
        provider_subject_id: Option<String>,
        display_name: Option<String>,
        picture: Option<String>,
        refresh_token_encrypted: Option<String>,
        token_expiry: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            role,
            status,
            provider,
            provider_subject_id,
            display_name,
            picture,
            access_token: None,
            refresh_token_encrypted,
            token_expiry,
            created_at,
            updated_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn status(&self) -> UserStatus {
        self.status
    }

    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    #[must_use]
    pub fn provider_subject_id(&self) -> Option<&str> {
        self.provider_subject_id.as_deref()
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn picture(&self) -> Option<&str> {
        self.picture.as_deref()
    }

    /// Returns the cached access token, if this process holds one.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns the encrypted refresh token envelope.
    #[must_use]
    pub fn refresh_token_encrypted(&self) -> Option<&str> {
        self.refresh_token_encrypted.as_deref()
    }

    /// Returns the access token expiry in epoch milliseconds.
    #[must_use]
    pub fn token_expiry(&self) -> i64 {
        self.token_expiry
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the cached access token if it is still valid at `now_ms`.
    #[must_use]
    pub fn live_access_token(&self, now_ms: i64) -> Option<&str> {
        if now_ms < self.token_expiry {
            self.access_token.as_deref()
        } else {
            None
        }
    }

    /// Restores the process-local access token cache.
    pub fn set_cached_access_token(&mut self, access_token: Option<String>) {
        self.access_token = access_token;
    }

    /// Merges a provider login into this record and marks it active.
    pub fn apply_login(&mut self, update: &ProfileUpdate, now: DateTime<Utc>) {
        self.provider = Some(update.provider.clone());
        if let Some(subject) = &update.provider_subject_id {
            self.provider_subject_id = Some(subject.clone());
        }
        if let Some(name) = &update.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(picture) = &update.picture {
            self.picture = Some(picture.clone());
        }
        if let Some(refresh) = &update.refresh_token_encrypted {
            self.refresh_token_encrypted = Some(refresh.clone());
        }
        self.access_token = Some(update.access_token.clone());
        self.token_expiry = update.token_expiry;
        self.status = UserStatus::Active;
        self.updated_at = now;
    }

    /// Records a renewed access token (and a rotated refresh token, if any).
    pub fn record_refresh(
        &mut self,
        access_token: String,
        refresh_token_encrypted: Option<String>,
        token_expiry: i64,
        now: DateTime<Utc>,
    ) {
        self.access_token = Some(access_token);
        if refresh_token_encrypted.is_some() {
            self.refresh_token_encrypted = refresh_token_encrypted;
        }
        self.token_expiry = token_expiry;
        self.updated_at = now;
    }
}
