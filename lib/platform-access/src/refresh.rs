//! Lazy renewal of provider access tokens.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::cipher::CredentialCipher;
use crate::error::{ProviderError, RefreshError};
use crate::provider::IdentityProvider;
use crate::store::IdentityStore;
use crate::user::InvitedUser;

/// Returns a live access token for a user, refreshing it when expired.
#[derive(Clone)]
pub struct TokenRefreshGuard {
    provider: Arc<dyn IdentityProvider>,
    identities: Arc<dyn IdentityStore>,
    cipher: Arc<CredentialCipher>,
}

impl TokenRefreshGuard {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        identities: Arc<dyn IdentityStore>,
        cipher: Arc<CredentialCipher>,
    ) -> Self {
        Self {
            provider,
            identities,
            cipher,
        }
    }

    /// Returns the cached access token while it is valid; otherwise
    /// exchanges the stored refresh token and persists the result.
    ///
    /// `user` is updated in place on refresh.
    ///
    /// # Errors
    ///
    /// Returns `ReauthRequired` if no refresh token is stored or the
    /// provider reports it revoked, `Cipher` if the stored envelope is
    /// corrupt or tampered with, and `Provider` for any other provider
    /// failure.
    #[instrument(skip_all, fields(user_id = %user.id()))]
    pub async fn ensure_fresh_token(&self, user: &mut InvitedUser) -> Result<String, RefreshError> {
        let now = Utc::now();
        if let Some(token) = user.live_access_token(now.timestamp_millis()) {
            debug!("access token still valid");
            return Ok(token.to_string());
        }

        let refresh_token = match user.refresh_token_encrypted() {
            Some(envelope) => self.cipher.decrypt(envelope)?,
            None => None,
        };
        let Some(refresh_token) = refresh_token else {
            info!("no refresh token stored, re-authentication required");
            return Err(RefreshError::ReauthRequired { user_id: user.id() });
        };

        let tokens = match self.provider.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(report) if *report.current_context() == ProviderError::GrantRevoked => {
                info!("refresh token revoked, re-authentication required");
                return Err(RefreshError::ReauthRequired { user_id: user.id() });
            }
            Err(report) => {
                error!(error = %report, "access token refresh failed");
                return Err(RefreshError::Provider {
                    reason: report.to_string(),
                });
            }
        };

        let rotated = match tokens.refresh_token.as_deref() {
            Some(token) => self.cipher.encrypt(token)?,
            None => None,
        };
        let now = Utc::now();
        user.record_refresh(
            tokens.access_token.clone(),
            rotated,
            tokens.expiry_millis(now.timestamp_millis()),
            now,
        );
        self.identities.update(user).await?;

        info!(expires_in = tokens.lifetime_secs(), "access token refreshed");
        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CipherError;
    use crate::memory::MemoryIdentityStore;
    use crate::provider::{ExternalIdentity, ProviderGrant, ProviderTokens};
    use crate::role::Role;
    use crate::user::ProfileUpdate;
    use async_trait::async_trait;
    use rootcause::Report;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        refreshes: AtomicUsize,
        failure: Option<ProviderError>,
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "google"
        }

        fn authorization_url(&self) -> Result<String, Report<ProviderError>> {
            Err(ProviderError::NotConfigured.into())
        }

        async fn exchange_code(&self, _: &str) -> Result<ProviderGrant, Report<ProviderError>> {
            Err(ProviderError::NotConfigured.into())
        }

        async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, Report<ProviderError>> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(failure) = &self.failure {
                return Err(failure.clone().into());
            }
            assert_eq!(refresh_token, "1//refresh");
            Ok(ProviderTokens {
                access_token: format!("renewed-{n}"),
                refresh_token: None,
                expires_in: Some(3599),
            })
        }

        async fn user_info(&self, _: &str) -> Result<ExternalIdentity, Report<ProviderError>> {
            Err(ProviderError::NotConfigured.into())
        }
    }

    struct Harness {
        guard: TokenRefreshGuard,
        provider: Arc<CountingProvider>,
        identities: Arc<MemoryIdentityStore>,
        cipher: Arc<CredentialCipher>,
    }

    fn harness(failure: Option<ProviderError>) -> Harness {
        let provider = Arc::new(CountingProvider {
            refreshes: AtomicUsize::new(0),
            failure,
        });
        let identities = Arc::new(MemoryIdentityStore::new());
        let cipher = Arc::new(CredentialCipher::from_key([9u8; 32]));
        Harness {
            guard: TokenRefreshGuard::new(provider.clone(), identities.clone(), cipher.clone()),
            provider,
            identities,
            cipher,
        }
    }

    async fn logged_in_user(h: &Harness, refresh: Option<&str>, token_expiry: i64) -> InvitedUser {
        h.identities.invite("a@x.com", Role::Student).await.unwrap();
        let refresh_token_encrypted = match refresh {
            Some(token) => h.cipher.encrypt(token).unwrap(),
            None => None,
        };
        let update = ProfileUpdate {
            provider: "google".to_string(),
            provider_subject_id: Some("sub".to_string()),
            display_name: None,
            picture: None,
            access_token: "cached".to_string(),
            refresh_token_encrypted,
            token_expiry,
        };
        h.identities.activate("a@x.com", &update).await.unwrap().unwrap()
    }

    fn far_future() -> i64 {
        Utc::now().timestamp_millis() + 3_600_000
    }

    #[tokio::test]
    async fn valid_token_never_calls_provider() {
        let h = harness(None);
        let mut user = logged_in_user(&h, Some("1//refresh"), far_future()).await;

        for _ in 0..5 {
            assert_eq!(h.guard.ensure_fresh_token(&mut user).await.unwrap(), "cached");
        }
        assert_eq!(h.provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let h = harness(None);
        let mut user = logged_in_user(&h, Some("1//refresh"), 0).await;

        let token = h.guard.ensure_fresh_token(&mut user).await.unwrap();
        assert_eq!(token, "renewed-1");
        assert!(user.token_expiry() > Utc::now().timestamp_millis());

        let stored = h.identities.find_by_id(user.id()).await.unwrap().unwrap();
        assert_eq!(stored.access_token(), Some("renewed-1"));
        assert_eq!(stored.token_expiry(), user.token_expiry());
        assert_eq!(stored.refresh_token_encrypted(), user.refresh_token_encrypted());

        assert_eq!(h.guard.ensure_fresh_token(&mut user).await.unwrap(), "renewed-1");
        assert_eq!(h.provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_cached_token_is_refreshed_even_before_expiry() {
        let h = harness(None);
        let mut user = logged_in_user(&h, Some("1//refresh"), far_future()).await;
        user.set_cached_access_token(None);

        assert_eq!(h.guard.ensure_fresh_token(&mut user).await.unwrap(), "renewed-1");
    }

    #[tokio::test]
    async fn missing_refresh_token_requires_reauth() {
        let h = harness(None);
        let mut user = logged_in_user(&h, None, 0).await;

        let err = h.guard.ensure_fresh_token(&mut user).await.unwrap_err();
        assert_eq!(err, RefreshError::ReauthRequired { user_id: user.id() });
        assert_eq!(h.provider.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tampered_refresh_token_is_an_integrity_error() {
        let h = harness(None);
        let mut user = logged_in_user(&h, Some("1//refresh"), 0).await;
        let envelope = user.refresh_token_encrypted().unwrap().to_string();
        let (head, tag) = envelope.rsplit_once(':').unwrap();
        let flipped = if tag.starts_with('0') { "1" } else { "0" };
        let tampered = format!("{head}:{flipped}{}", &tag[1..]);
        user.record_refresh("cached".to_string(), Some(tampered), 0, Utc::now());

        let err = h.guard.ensure_fresh_token(&mut user).await.unwrap_err();
        assert_eq!(err, RefreshError::Cipher(CipherError::Integrity));
    }

    #[tokio::test]
    async fn revoked_refresh_token_requires_reauth() {
        let h = harness(Some(ProviderError::GrantRevoked));
        let mut user = logged_in_user(&h, Some("1//refresh"), 0).await;

        let err = h.guard.ensure_fresh_token(&mut user).await.unwrap_err();
        assert_eq!(err, RefreshError::ReauthRequired { user_id: user.id() });
        assert_eq!(h.provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(user.access_token(), Some("cached"));
    }

    #[tokio::test]
    async fn provider_outage_is_reported() {
        let h = harness(Some(ProviderError::Refresh {
            reason: "connection reset".to_string(),
        }));
        let mut user = logged_in_user(&h, Some("1//refresh"), 0).await;

        let err = h.guard.ensure_fresh_token(&mut user).await.unwrap_err();
        assert!(matches!(err, RefreshError::Provider { .. }));
        assert_eq!(user.access_token(), Some("cached"));
    }
}
