//! User administration: invitations, listing, and deletion.

use async_trait::async_trait;
use gradebook_core::UserId;
use rootcause::Report;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AdminError, MailError};
use crate::role::Role;
use crate::store::{IdentityStore, ProfileStore, SessionStore};
use crate::user::{InvitedUser, normalize_email};

/// Delivers invitation emails.
#[async_trait]
pub trait InvitationMailer: Send + Sync {
    async fn send_invitation(&self, email: &str, role: Role) -> Result<(), Report<MailError>>;
}

/// Body of an invitation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteRequest {
    pub email: Option<String>,
    pub role: Option<String>,
}

impl InviteRequest {
    /// Checks that both fields are present and the role is known.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` describing the first problem found.
    pub fn validate(&self) -> Result<(String, Role), AdminError> {
        let email = self
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AdminError::InvalidInput {
                reason: "email and role are required".to_string(),
            })?;
        let role = self
            .role
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AdminError::InvalidInput {
                reason: "email and role are required".to_string(),
            })?;

        if !is_plausible_email(&email) {
            return Err(AdminError::InvalidInput {
                reason: format!("'{email}' is not a valid email address"),
            });
        }
        let role = role.parse::<Role>().map_err(|e| AdminError::InvalidInput {
            reason: e.to_string(),
        })?;
        Ok((email, role))
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Outcome of deleting a user.
#[derive(Debug, Clone)]
pub struct DeletedUser {
    pub user: InvitedUser,
    pub unlinked_profiles: u64,
    pub revoked_sessions: u64,
}

/// Admin-only user management.
#[derive(Clone)]
pub struct UserAdministration {
    identities: Arc<dyn IdentityStore>,
    profiles: Arc<dyn ProfileStore>,
    sessions: Arc<dyn SessionStore>,
    mailer: Arc<dyn InvitationMailer>,
}

impl UserAdministration {
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        profiles: Arc<dyn ProfileStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn InvitationMailer>,
    ) -> Self {
        Self {
            identities,
            profiles,
            sessions,
            mailer,
        }
    }

    /// Creates an invitation and sends the email in the background.
    ///
    /// A failed email never rolls back the invitation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a bad request and `Conflict` if the email
    /// is already invited or active.
    pub async fn invite(&self, request: &InviteRequest) -> Result<InvitedUser, AdminError> {
        let (email, role) = request.validate()?;
        let user = self.identities.invite(&email, role).await?;
        info!(user_id = %user.id(), email = %user.email(), role = %role, "user invited");

        let mailer = Arc::clone(&self.mailer);
        tokio::spawn(async move {
            if let Err(report) = mailer.send_invitation(&email, role).await {
                warn!(email = %email, error = %report, "failed to send invitation email");
            }
        });

        Ok(user)
    }

    /// Lists users, newest first.
    ///
    /// # Errors
    ///
    /// Returns the store error if the listing fails.
    pub async fn list(&self) -> Result<Vec<InvitedUser>, AdminError> {
        Ok(self.identities.list().await?)
    }

    /// Revokes a user's sessions, unlinks their profile, then deletes the
    /// record.
    ///
    /// The record goes last, so a failed step leaves the user in place and
    /// the delete can be retried.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such user exists.
    pub async fn delete(&self, id: UserId) -> Result<DeletedUser, AdminError> {
        if self.identities.find_by_id(id).await?.is_none() {
            return Err(AdminError::NotFound { id: id.to_string() });
        }
        let mut revoked_sessions = self.sessions.destroy_for_user(id).await?;
        let unlinked_profiles = self.profiles.unlink_user(id).await?;
        let user = self.identities.delete(id).await?;
        // Sessions bound while the delete was in flight.
        revoked_sessions += self.sessions.destroy_for_user(id).await?;

        info!(
            user_id = %id,
            email = %user.email(),
            unlinked_profiles,
            revoked_sessions,
            "user deleted"
        );
        Ok(DeletedUser {
            user,
            unlinked_profiles,
            revoked_sessions,
        })
    }
}
