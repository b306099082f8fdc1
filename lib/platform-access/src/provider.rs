//! OAuth exchange with the identity provider.
//!
//! The [`IdentityProvider`] trait is the seam to the concrete provider
//! client. [`OAuthExchange`] drives one callback from awaiting a code to an
//! exchanged [`ProviderGrant`].

use async_trait::async_trait;
use rootcause::Report;
use std::sync::Arc;
use tracing::{error, instrument};

use crate::error::{BindError, ProviderError};

/// Lifetime applied when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// The authenticated identity reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Stable subject id at the provider.
    pub subject_id: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Tokens issued by the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds, as reported.
    pub expires_in: Option<u64>,
}

impl ProviderTokens {
    /// Returns the access token lifetime, defaulting to one hour.
    #[must_use]
    pub fn lifetime_secs(&self) -> u64 {
        self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
    }

    /// Returns the access token expiry in epoch milliseconds.
    #[must_use]
    pub fn expiry_millis(&self, now_ms: i64) -> i64 {
        let lifetime_ms = i64::try_from(self.lifetime_secs())
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        now_ms.saturating_add(lifetime_ms)
    }
}

impl std::fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Result of a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderGrant {
    pub identity: ExternalIdentity,
    pub tokens: ProviderTokens,
}

/// A third-party identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name recorded on the invited user (`google`).
    fn name(&self) -> &'static str;

    /// Builds the authorization URL, requesting offline access and forcing
    /// consent. Deterministic given configuration.
    fn authorization_url(&self) -> Result<String, Report<ProviderError>>;

    /// Exchanges an authorization code and fetches the identity.
    async fn exchange_code(&self, code: &str) -> Result<ProviderGrant, Report<ProviderError>>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, Report<ProviderError>>;

    /// Fetches the identity behind a live access token.
    async fn user_info(&self, access_token: &str)
    -> Result<ExternalIdentity, Report<ProviderError>>;
}

/// Drives the authorization-code exchange for a single callback.
#[derive(Clone)]
pub struct OAuthExchange {
    provider: Arc<dyn IdentityProvider>,
}

impl OAuthExchange {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Returns the provider redirect URL.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the provider is not set up.
    pub fn initiate(&self) -> Result<String, Report<ProviderError>> {
        self.provider.authorization_url()
    }

    /// Exchanges the callback code. Failures are reported, never retried.
    ///
    /// # Errors
    ///
    /// Returns `MissingCode` if no code was supplied and `Provider` if the
    /// exchange failed.
    #[instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn exchange(&self, code: Option<&str>) -> Result<ProviderGrant, BindError> {
        let code = code
            .filter(|c| !c.is_empty())
            .ok_or(BindError::MissingCode)?;

        self.provider.exchange_code(code).await.map_err(|report| {
            error!(error = %report, "authorization code exchange failed");
            BindError::Provider {
                reason: report.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn authorization_url(&self) -> Result<String, Report<ProviderError>> {
            Err(ProviderError::NotConfigured.into())
        }

        async fn exchange_code(&self, code: &str) -> Result<ProviderGrant, Report<ProviderError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::TokenExchange {
                    reason: "invalid_grant".to_string(),
                }
                .into());
            }
            Ok(ProviderGrant {
                identity: ExternalIdentity {
                    subject_id: code.to_string(),
                    email: "a@x.com".to_string(),
                    name: None,
                    picture: None,
                },
                tokens: ProviderTokens {
                    access_token: "access".to_string(),
                    refresh_token: None,
                    expires_in: None,
                },
            })
        }

        async fn refresh(&self, _: &str) -> Result<ProviderTokens, Report<ProviderError>> {
            Err(ProviderError::NotConfigured.into())
        }

        async fn user_info(&self, _: &str) -> Result<ExternalIdentity, Report<ProviderError>> {
            Err(ProviderError::NotConfigured.into())
        }
    }

    fn exchange(fail: bool) -> (OAuthExchange, Arc<StubProvider>) {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            fail,
        });
        (OAuthExchange::new(provider.clone()), provider)
    }

    #[test]
    fn missing_expires_in_defaults_to_one_hour() {
        let tokens = ProviderTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        assert_eq!(tokens.lifetime_secs(), 3600);
        assert_eq!(tokens.expiry_millis(1_000), 3_601_000);
    }

    #[test]
    fn reported_expires_in_is_used() {
        let tokens = ProviderTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(120),
        };
        assert_eq!(tokens.expiry_millis(0), 120_000);
    }

    #[test]
    fn debug_redacts_tokens() {
        let tokens = ProviderTokens {
            access_token: "ya29.secret".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_in: Some(10),
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("ya29.secret"));
        assert!(!debug.contains("1//refresh"));
    }

    #[tokio::test]
    async fn missing_code_never_calls_provider() {
        let (exchange, provider) = exchange(false);
        assert_eq!(exchange.exchange(None).await, Err(BindError::MissingCode));
        assert_eq!(exchange.exchange(Some("")).await, Err(BindError::MissingCode));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_reported_once() {
        let (exchange, provider) = exchange(true);
        let err = exchange.exchange(Some("code")).await.unwrap_err();
        assert!(matches!(err, BindError::Provider { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_exchange_returns_grant() {
        let (exchange, _) = exchange(false);
        let grant = exchange.exchange(Some("code-1")).await.unwrap();
        assert_eq!(grant.identity.subject_id, "code-1");
        assert_eq!(grant.tokens.access_token, "access");
    }

    #[test]
    fn initiate_surfaces_configuration_errors() {
        let (exchange, _) = exchange(false);
        assert!(exchange.initiate().is_err());
    }
}
