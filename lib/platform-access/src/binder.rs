//! Session binder: invitation-only admission for OAuth callbacks.
//!
//! Turns a verified external identity into an authenticated session:
//!
//! 1. reject a replayed callback (`oauth_used` already set), otherwise set
//!    and persist the flag before any other work
//! 2. exchange the code with the provider
//! 3. atomically activate the invited user with this email, merging the
//!    provider profile and tokens (`NotInvited` if there is none)
//! 4. link a STUDENT to the unlinked profile sharing their email
//! 5. issue a fresh authenticated session and destroy the old one

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cipher::CredentialCipher;
use crate::error::BindError;
use crate::provider::{OAuthExchange, ProviderGrant};
use crate::role::Role;
use crate::session::{Session, SessionId};
use crate::store::{IdentityStore, LinkOutcome, ProfileStore, SessionStore};
use crate::user::{InvitedUser, ProfileUpdate};

/// A successfully bound session.
#[derive(Debug, Clone)]
pub struct BoundSession {
    /// The new authenticated session; its id goes into the cookie.
    pub session: Session,
    /// The activated user.
    pub user: InvitedUser,
    /// Profile linking result, for STUDENT users.
    pub link: Option<LinkOutcome>,
    /// The pre-authentication session that was destroyed.
    pub replaced: SessionId,
}

/// Completes OAuth callbacks into sessions.
#[derive(Clone)]
pub struct SessionBinder {
    exchange: OAuthExchange,
    identities: Arc<dyn IdentityStore>,
    profiles: Arc<dyn ProfileStore>,
    sessions: Arc<dyn SessionStore>,
    cipher: Arc<CredentialCipher>,
    session_ttl: Duration,
}

impl SessionBinder {
    #[must_use]
    pub fn new(
        exchange: OAuthExchange,
        identities: Arc<dyn IdentityStore>,
        profiles: Arc<dyn ProfileStore>,
        sessions: Arc<dyn SessionStore>,
        cipher: Arc<CredentialCipher>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            exchange,
            identities,
            profiles,
            sessions,
            cipher,
            session_ttl,
        }
    }

    /// Handles an OAuth callback for the current browser session.
    ///
    /// `session` is updated in place with the one-shot flag even when the
    /// callback is later rejected.
    ///
    /// # Errors
    ///
    /// Every failure maps to a login-redirect reason via
    /// [`BindError::reason_code`].
    #[instrument(skip_all, fields(session_id = %session.id()))]
    pub async fn complete(
        &self,
        session: &mut Session,
        code: Option<&str>,
    ) -> Result<BoundSession, BindError> {
        if session.oauth_used() {
            warn!("OAuth callback replayed within the same session");
            return Err(BindError::Replay);
        }
        session.mark_oauth_used();
        self.sessions.save(session).await?;

        let grant = self.exchange.exchange(code).await?;
        self.bind_identity(session, grant).await
    }

    /// Admits an already-exchanged identity and issues the session.
    ///
    /// # Errors
    ///
    /// Returns `NotInvited` if the email is not on the allow-list, and
    /// `Store`/`Cipher` if persisting the login fails.
    #[instrument(skip_all, fields(email = %grant.identity.email))]
    pub async fn bind_identity(
        &self,
        session: &Session,
        grant: ProviderGrant,
    ) -> Result<BoundSession, BindError> {
        let ProviderGrant { identity, tokens } = grant;
        let now_ms = Utc::now().timestamp_millis();

        let refresh_token_encrypted = match tokens.refresh_token.as_deref() {
            Some(token) => self.cipher.encrypt(token)?,
            None => None,
        };
        let update = ProfileUpdate {
            provider: self.exchange.provider_name().to_string(),
            provider_subject_id: Some(identity.subject_id.clone()),
            display_name: identity.name.clone(),
            picture: identity.picture.clone(),
            access_token: tokens.access_token.clone(),
            refresh_token_encrypted,
            token_expiry: tokens.expiry_millis(now_ms),
        };

        let Some(user) = self.identities.activate(&identity.email, &update).await? else {
            warn!("sign-in rejected: email not invited");
            return Err(BindError::NotInvited {
                email: identity.email,
            });
        };

        let link = if user.role() == Role::Student {
            let outcome = self.profiles.link_by_email(user.email(), user.id()).await?;
            match outcome {
                LinkOutcome::Linked(student_id) => {
                    info!(user_id = %user.id(), student_id = %student_id, "linked student profile");
                }
                LinkOutcome::AlreadyLinked(student_id) => {
                    info!(user_id = %user.id(), student_id = %student_id, "student profile already linked");
                }
                LinkOutcome::NoProfile => {
                    debug!(user_id = %user.id(), "no student profile for this email");
                }
            }
            Some(outcome)
        } else {
            None
        };

        let bound = Session::authenticated(&user, self.session_ttl);
        self.sessions.save(&bound).await?;
        if bound.id() != session.id() {
            self.sessions.destroy(session.id()).await?;
        }

        info!(user_id = %user.id(), role = %user.role(), "session created");
        Ok(BoundSession {
            session: bound,
            user,
            link,
            replaced: session.id().clone(),
        })
    }
}
