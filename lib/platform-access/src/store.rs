//! Persistence contracts consumed by the access core.
//!
//! Three stores, each the sole owner of its records:
//! - [`IdentityStore`]: invited users
//! - [`ProfileStore`]: domain profiles (students) and their user link
//! - [`SessionStore`]: server-side sessions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gradebook_core::{StudentId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::role::Role;
use crate::session::{Session, SessionId};
use crate::user::{InvitedUser, ProfileUpdate};

/// Durable mapping of invited emails to accounts.
///
/// Implementations normalize emails with [`crate::user::normalize_email`]
/// and enforce email uniqueness.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Creates an invitation.
    ///
    /// Fails with `Conflict` if the email is already invited or active;
    /// the existing record is left untouched.
    async fn invite(&self, email: &str, role: Role) -> Result<InvitedUser, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<InvitedUser>, StoreError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<InvitedUser>, StoreError>;

    /// Atomically merges a provider login into the invited user with this
    /// email and marks it active. Returns `None` if the email is not invited.
    async fn activate(
        &self,
        email: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<InvitedUser>, StoreError>;

    /// Overwrites the stored record. Fails with `NotFound` if absent.
    async fn update(&self, user: &InvitedUser) -> Result<(), StoreError>;

    /// Removes the record. Fails with `NotFound` if absent.
    async fn delete(&self, id: UserId) -> Result<InvitedUser, StoreError>;

    /// Lists all users, newest first.
    async fn list(&self) -> Result<Vec<InvitedUser>, StoreError>;
}

/// A student record, the domain profile an invited user may be linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: StudentId,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Back-reference to the invited user, set on first login.
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl StudentProfile {
    /// Creates an unlinked profile.
    #[must_use]
    pub fn new(student_number: &str, first_name: &str, last_name: &str, email: &str) -> Self {
        Self {
            id: StudentId::new(),
            student_number: student_number.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: crate::user::normalize_email(email),
            user_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Result of linking a user to the profile sharing their email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The profile was unlinked and now references the user.
    Linked(StudentId),
    /// A profile already references a user; nothing was overwritten.
    AlreadyLinked(StudentId),
    /// No profile matches the email.
    NoProfile,
}

/// Domain profile collaborator.
///
/// At most one profile may reference a given user id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn create(&self, profile: StudentProfile) -> Result<StudentProfile, StoreError>;

    /// Links the profile whose email matches, unless it is already linked
    /// or the user is already linked elsewhere.
    async fn link_by_email(&self, email: &str, user_id: UserId)
    -> Result<LinkOutcome, StoreError>;

    /// Clears every back-reference to `user_id`. Returns the count cleared.
    async fn unlink_user(&self, user_id: UserId) -> Result<u64, StoreError>;

    async fn find_by_user(&self, user_id: UserId) -> Result<Option<StudentProfile>, StoreError>;

    async fn list(&self) -> Result<Vec<StudentProfile>, StoreError>;
}

/// Server-side session storage keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session by id, expired or not.
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Inserts or replaces a session.
    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Removes a session. Succeeds if it is already gone.
    async fn destroy(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Removes every session bound to `user_id`. Returns the count removed.
    async fn destroy_for_user(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Removes sessions that expired before `now`. Returns the count removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
