//! Authentication module for the gradebook server.
//!
//! This module provides:
//! - Google OAuth sign-in restricted to invited emails
//! - Database-backed identity, profile, and session stores
//! - Session loading and role-gating middleware for Axum routes
//!
//! # Authorization Model
//!
//! Sessions carry the user's role, copied from the invited-user record at
//! sign-in. Every protected route declares the set of roles allowed to reach
//! it; the check runs against the session alone. Deleting a user destroys
//! their sessions, so revocation is immediate.

pub mod db;
pub mod google;
pub mod middleware;
pub mod routes;

use gradebook_platform_access::{
    AuthorizationGate, CredentialCipher, IdentityProvider, IdentityStore, InvitationMailer,
    OAuthExchange, ProfileStore, SessionBinder, SessionStore, TokenRefreshGuard,
    UserAdministration,
};
use std::sync::Arc;

use crate::config::{Environment, SessionConfig};

pub use db::{PgIdentityStore, PgProfileStore, PgSessionStore};
pub use google::GoogleOAuthClient;
pub use middleware::{CurrentSession, CurrentUser, load_session, require_authenticated, require_role};
pub use routes::{google_callback, google_start, logout, provider_profile, status};

/// Stores backing the application.
#[derive(Clone)]
pub struct Stores {
    pub identities: Arc<dyn IdentityStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub sessions: Arc<dyn SessionStore>,
}

/// Shared application state.
pub struct AppState {
    /// Deployment environment.
    pub environment: Environment,
    /// Origin of the single-page client.
    pub front_url: String,
    /// Session configuration.
    pub session_config: SessionConfig,
    /// Identity provider used for sign-in and token renewal.
    pub provider: Arc<dyn IdentityProvider>,
    pub exchange: OAuthExchange,
    pub binder: SessionBinder,
    pub gate: AuthorizationGate,
    pub refresh: TokenRefreshGuard,
    pub admin: UserAdministration,
    pub stores: Stores,
}

impl AppState {
    /// Wires the access core over the given stores and collaborators.
    #[must_use]
    pub fn new(
        environment: Environment,
        front_url: String,
        session_config: SessionConfig,
        stores: Stores,
        provider: Arc<dyn IdentityProvider>,
        cipher: Arc<CredentialCipher>,
        mailer: Arc<dyn InvitationMailer>,
    ) -> Self {
        let exchange = OAuthExchange::new(Arc::clone(&provider));
        let binder = SessionBinder::new(
            exchange.clone(),
            Arc::clone(&stores.identities),
            Arc::clone(&stores.profiles),
            Arc::clone(&stores.sessions),
            Arc::clone(&cipher),
            session_config.ttl(),
        );
        let gate = AuthorizationGate::new(Arc::clone(&stores.sessions));
        let refresh = TokenRefreshGuard::new(
            Arc::clone(&provider),
            Arc::clone(&stores.identities),
            cipher,
        );
        let admin = UserAdministration::new(
            Arc::clone(&stores.identities),
            Arc::clone(&stores.profiles),
            Arc::clone(&stores.sessions),
            mailer,
        );

        Self {
            environment,
            front_url: front_url.trim_end_matches('/').to_string(),
            session_config,
            provider,
            exchange,
            binder,
            gate,
            refresh,
            admin,
            stores,
        }
    }

    /// Builds a client URL from a path such as `/dashboard`.
    #[must_use]
    pub fn front_link(&self, path: &str) -> String {
        format!("{}{path}", self.front_url)
    }
}
