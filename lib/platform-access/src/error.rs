//! Error types for the platform-access crate.
//!
//! One enum per concern, so callers can tell "reauthenticate" apart from
//! "corrupted data" and "not invited" apart from "provider down":
//! - `CipherError`: credential envelope failures (format vs integrity)
//! - `StoreError`: identity, profile, and session persistence failures
//! - `ProviderError`: identity provider exchange failures
//! - `BindError`: OAuth callback admission failures
//! - `GateError`: per-request authentication/authorization rejections
//! - `RefreshError`: access token renewal failures
//! - `AdminError`: user administration failures
//! - `MailError`: invitation delivery failures

use gradebook_core::UserId;
use std::fmt;

use crate::role::{Role, RoleSet};

/// A closed enumeration received an unknown value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    /// Which enumeration was being parsed (`role`, `status`).
    pub kind: &'static str,
    /// The rejected value.
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Errors from the credential cipher.
///
/// Messages never include plaintext or key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// The envelope does not parse as `iv:ciphertext:tag`.
    Format { reason: String },
    /// The authentication tag did not verify (tampering, wrong key, corruption).
    Integrity,
    /// The configured secret could not be stretched into a key.
    KeyDerivation { reason: String },
    /// Encryption itself failed.
    Encryption { reason: String },
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format { reason } => write!(f, "malformed credential envelope: {reason}"),
            Self::Integrity => write!(f, "credential envelope failed integrity check"),
            Self::KeyDerivation { reason } => write!(f, "key derivation failed: {reason}"),
            Self::Encryption { reason } => write!(f, "encryption failed: {reason}"),
        }
    }
}

impl std::error::Error for CipherError {}

/// Errors from the identity, profile, and session stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with this email already exists.
    Conflict { email: String },
    /// A student profile already uses this student number or email.
    DuplicateProfile { field: &'static str, value: String },
    /// No record with this id.
    NotFound { id: String },
    /// A stored record could not be decoded (unknown role, bad id).
    InvalidRecord { reason: String },
    /// The backing store failed.
    Backend { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { email } => write!(f, "a user with email '{email}' already exists"),
            Self::DuplicateProfile { field, value } => {
                write!(f, "a student profile with {field} '{value}' already exists")
            }
            Self::NotFound { id } => write!(f, "record not found: {id}"),
            Self::InvalidRecord { reason } => write!(f, "invalid stored record: {reason}"),
            Self::Backend { reason } => write!(f, "store backend error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider credentials are not configured.
    NotConfigured,
    /// Provider configuration is invalid (bad URLs).
    Configuration { reason: String },
    /// The authorization code exchange failed.
    TokenExchange { reason: String },
    /// Fetching the authenticated identity failed.
    UserInfo { reason: String },
    /// The refresh token grant failed.
    Refresh { reason: String },
    /// The provider refused the refresh token as revoked or expired.
    GrantRevoked,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "identity provider is not configured"),
            Self::Configuration { reason } => {
                write!(f, "identity provider configuration error: {reason}")
            }
            Self::TokenExchange { reason } => write!(f, "token exchange failed: {reason}"),
            Self::UserInfo { reason } => write!(f, "user info request failed: {reason}"),
            Self::Refresh { reason } => write!(f, "token refresh failed: {reason}"),
            Self::GrantRevoked => write!(f, "refresh token was revoked or has expired"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors from the OAuth callback (session binding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The callback carried no authorization code.
    MissingCode,
    /// The callback was already consumed in this browser session.
    Replay,
    /// The provider exchange failed; not retried.
    Provider { reason: String },
    /// The authenticated email has no invitation.
    NotInvited { email: String },
    /// Persisting the identity or session failed.
    Store(StoreError),
    /// Encrypting the refresh token failed.
    Cipher(CipherError),
}

impl BindError {
    /// Opaque reason code carried back to the login view.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MissingCode => "no_code",
            Self::Replay => "oauth_reuse",
            Self::Provider { .. } => "provider_error",
            Self::NotInvited { .. } => "not_invited",
            Self::Store(_) | Self::Cipher(_) => "auth_failed",
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCode => write!(f, "authorization code missing from callback"),
            Self::Replay => write!(f, "OAuth callback already used in this session"),
            Self::Provider { reason } => write!(f, "identity provider error: {reason}"),
            Self::NotInvited { email } => write!(f, "email '{email}' has not been invited"),
            Self::Store(err) => write!(f, "session binding store error: {err}"),
            Self::Cipher(err) => write!(f, "session binding cipher error: {err}"),
        }
    }
}

impl std::error::Error for BindError {}

impl From<StoreError> for BindError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<CipherError> for BindError {
    fn from(err: CipherError) -> Self {
        Self::Cipher(err)
    }
}

/// Rejections from the authorization gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// No authenticated session.
    Unauthenticated,
    /// The session's role is not in the route's allowed set.
    Forbidden { role: Role, allowed: RoleSet },
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "not authenticated"),
            Self::Forbidden { role, allowed } => {
                write!(f, "role {role} is not allowed, expected one of {allowed}")
            }
        }
    }
}

impl std::error::Error for GateError {}

/// Errors from the token refresh guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No usable refresh token is stored; the user must sign in again.
    ReauthRequired { user_id: UserId },
    /// The stored refresh token could not be decrypted.
    Cipher(CipherError),
    /// The provider rejected the refresh.
    Provider { reason: String },
    /// Persisting the renewed token failed.
    Store(StoreError),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReauthRequired { user_id } => {
                write!(f, "user {user_id} must re-authenticate with the provider")
            }
            Self::Cipher(err) => write!(f, "stored refresh token unusable: {err}"),
            Self::Provider { reason } => write!(f, "token refresh rejected: {reason}"),
            Self::Store(err) => write!(f, "token refresh store error: {err}"),
        }
    }
}

impl std::error::Error for RefreshError {}

impl From<StoreError> for RefreshError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<CipherError> for RefreshError {
    fn from(err: CipherError) -> Self {
        Self::Cipher(err)
    }
}

/// Errors from user administration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// Request fields are missing or malformed.
    InvalidInput { reason: String },
    /// The email is already invited or active.
    Conflict { email: String },
    /// No user with this id.
    NotFound { id: String },
    /// The backing store failed.
    Store(StoreError),
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { reason } => write!(f, "invalid input: {reason}"),
            Self::Conflict { email } => write!(f, "user '{email}' is already invited or active"),
            Self::NotFound { id } => write!(f, "user not found: {id}"),
            Self::Store(err) => write!(f, "user administration store error: {err}"),
        }
    }
}

impl std::error::Error for AdminError {}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { email } => Self::Conflict { email },
            StoreError::NotFound { id } => Self::NotFound { id },
            other => Self::Store(other),
        }
    }
}

/// Errors from invitation delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// A sender or recipient address did not parse.
    Address { reason: String },
    /// The message could not be assembled.
    Build { reason: String },
    /// The transport failed to deliver.
    Transport { reason: String },
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address { reason } => write!(f, "invalid email address: {reason}"),
            Self::Build { reason } => write!(f, "failed to build email: {reason}"),
            Self::Transport { reason } => write!(f, "email transport error: {reason}"),
        }
    }
}

impl std::error::Error for MailError {}
