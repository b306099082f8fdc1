//! Authentication and session authorization for gradebook.
//!
//! This crate provides:
//! - Roles and route role sets (`Role`, `RoleSet`)
//! - Invited users and the login profile merge (`InvitedUser`, `ProfileUpdate`)
//! - Server-side sessions (`Session`, `SessionId`)
//! - Refresh token encryption at rest (`CredentialCipher`)
//! - Store contracts and in-memory implementations
//! - The OAuth exchange and session binder (`OAuthExchange`, `SessionBinder`)
//! - Authorization gate checks (`require_authenticated`, `require_role`)
//! - Access token renewal (`TokenRefreshGuard`)
//! - User administration (`UserAdministration`)
//!
//! # Access Control Model
//!
//! Admission is invitation-only: an administrator invites an email with a
//! role, and the first OAuth sign-in for that email activates it. Every
//! protected route declares the role set allowed to reach it.
//!
//! # Example
//!
//! ```
//! use gradebook_platform_access::{InvitedUser, Role, RoleSet, Session, require_role};
//! use chrono::Duration;
//!
//! let user = InvitedUser::invite("registrar@example.edu", Role::Scolarite);
//! let session = Session::authenticated(&user, Duration::hours(24));
//!
//! assert!(require_role(Some(&session), &RoleSet::staff()).is_ok());
//! assert!(require_role(Some(&session), &RoleSet::admin()).is_err());
//! ```

pub mod admin;
pub mod binder;
pub mod cipher;
pub mod error;
pub mod gate;
pub mod memory;
pub mod provider;
pub mod refresh;
pub mod role;
pub mod session;
pub mod store;
pub mod user;

// Re-export main types at crate root
pub use admin::{DeletedUser, InvitationMailer, InviteRequest, UserAdministration};
pub use binder::{BoundSession, SessionBinder};
pub use cipher::{CredentialCipher, LEGACY_SALT};
pub use error::{
    AdminError, BindError, CipherError, GateError, MailError, ParseEnumError, ProviderError,
    RefreshError, StoreError,
};
pub use gate::{AuthStatus, AuthorizationGate, require_authenticated, require_role};
pub use memory::{MemoryIdentityStore, MemoryProfileStore, MemorySessionStore};
pub use provider::{
    DEFAULT_TOKEN_LIFETIME_SECS, ExternalIdentity, IdentityProvider, OAuthExchange,
    ProviderGrant, ProviderTokens,
};
pub use refresh::TokenRefreshGuard;
pub use role::{Role, RoleSet};
pub use session::{Session, SessionId, SessionUser};
pub use store::{IdentityStore, LinkOutcome, ProfileStore, SessionStore, StudentProfile};
pub use user::{InvitedUser, ProfileUpdate, UserStatus, normalize_email};
