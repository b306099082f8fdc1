//! Google OAuth 2.0 identity provider.
//!
//! - authorization URL with `access_type=offline` and `prompt=consent`, so a
//!   refresh token is issued on every sign-in
//! - code exchange and refresh token grants via `oauth2`
//! - identity lookup against the userinfo endpoint

use async_trait::async_trait;
use gradebook_platform_access::{
    ExternalIdentity, IdentityProvider, ProviderError, ProviderGrant, ProviderTokens,
};
use oauth2::{
    AuthorizationCode, ClientId, ClientSecret, EmptyExtraTokenFields, RedirectUrl, RefreshToken,
    RequestTokenError, StandardTokenResponse, TokenResponse, TokenUrl,
    basic::{BasicClient, BasicErrorResponseType, BasicTokenType},
};
use rootcause::Report;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::GoogleOAuthConfig;

/// Google OAuth authorization URL.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google OAuth token URL.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google userinfo endpoint.
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Sign-in scopes.
const SIGN_IN_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Provider name recorded on invited users.
pub const PROVIDER_NAME: &str = "google";

type GoogleTokenResponse = StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>;

#[derive(Clone)]
struct GoogleCredentials {
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

/// Google OAuth client.
///
/// Constructed even without credentials; every operation then fails with
/// `NotConfigured`.
#[derive(Clone)]
pub struct GoogleOAuthClient {
    credentials: Option<GoogleCredentials>,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    http: reqwest::Client,
}

/// Userinfo response body.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: String,
    verified_email: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

impl TryFrom<GoogleUserInfo> for ExternalIdentity {
    type Error = ProviderError;

    /// Invitations are keyed on email, so an address Google reports as
    /// unverified is never accepted.
    fn try_from(info: GoogleUserInfo) -> Result<Self, Self::Error> {
        if info.verified_email == Some(false) {
            return Err(ProviderError::UserInfo {
                reason: format!("email '{}' is not verified", info.email),
            });
        }
        Ok(Self {
            subject_id: info.id,
            email: info.email,
            name: info.name,
            picture: info.picture,
        })
    }
}

impl GoogleOAuthClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the redirect URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: &GoogleOAuthConfig) -> Result<Self, Report<ProviderError>> {
        let credentials = match (&config.client_id, &config.client_secret, &config.redirect_url) {
            (Some(client_id), Some(client_secret), Some(redirect_url)) => {
                RedirectUrl::new(redirect_url.clone()).map_err(|e| {
                    ProviderError::Configuration {
                        reason: format!("invalid redirect URL: {e}"),
                    }
                })?;
                Some(GoogleCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    redirect_url: redirect_url.clone(),
                })
            }
            _ => None,
        };

        // Token endpoints must not follow redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Configuration {
                reason: format!("HTTP client error: {e}"),
            })?;

        Ok(Self {
            credentials,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            http,
        })
    }

    /// Returns true if client credentials are configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn credentials(&self) -> Result<&GoogleCredentials, Report<ProviderError>> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured.into())
    }

    fn token_client(
        &self,
        credentials: &GoogleCredentials,
    ) -> Result<
        BasicClient<
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointSet,
        >,
        Report<ProviderError>,
    > {
        let token_url =
            TokenUrl::new(self.token_url.clone()).map_err(|e| ProviderError::Configuration {
                reason: format!("invalid token URL: {e}"),
            })?;
        let redirect_url = RedirectUrl::new(credentials.redirect_url.clone()).map_err(|e| {
            ProviderError::Configuration {
                reason: format!("invalid redirect URL: {e}"),
            }
        })?;

        Ok(BasicClient::new(ClientId::new(credentials.client_id.clone()))
            .set_client_secret(ClientSecret::new(credentials.client_secret.clone()))
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url))
    }
}

fn tokens_from(response: &GoogleTokenResponse) -> ProviderTokens {
    ProviderTokens {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_in: response.expires_in().map(|d| d.as_secs()),
    }
}

#[async_trait]
impl IdentityProvider for GoogleOAuthClient {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn authorization_url(&self) -> Result<String, Report<ProviderError>> {
        let credentials = self.credentials()?;
        let scope = SIGN_IN_SCOPES.join(" ");
        let url = reqwest::Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", credentials.client_id.as_str()),
                ("redirect_uri", credentials.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| ProviderError::Configuration {
            reason: format!("invalid authorization URL: {e}"),
        })?;
        Ok(url.to_string())
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<ProviderGrant, Report<ProviderError>> {
        let credentials = self.credentials()?;
        let client = self.token_client(credentials)?;

        let response: GoogleTokenResponse = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::TokenExchange {
                reason: e.to_string(),
            })?;
        let tokens = tokens_from(&response);
        debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_in = ?tokens.expires_in,
            "authorization code exchanged"
        );

        let identity = self.user_info(&tokens.access_token).await?;
        Ok(ProviderGrant { identity, tokens })
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens, Report<ProviderError>> {
        let credentials = self.credentials()?;
        let client = self.token_client(credentials)?;

        let response: GoogleTokenResponse = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| match &e {
                RequestTokenError::ServerResponse(response)
                    if *response.error() == BasicErrorResponseType::InvalidGrant =>
                {
                    ProviderError::GrantRevoked
                }
                _ => ProviderError::Refresh {
                    reason: e.to_string(),
                },
            })?;
        Ok(tokens_from(&response))
    }

    #[instrument(skip_all)]
    async fn user_info(&self, access_token: &str) -> Result<ExternalIdentity, Report<ProviderError>> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::UserInfo {
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| ProviderError::UserInfo {
                reason: e.to_string(),
            })?;

        let info: GoogleUserInfo = response.json().await.map_err(|e| ProviderError::UserInfo {
            reason: format!("invalid userinfo response: {e}"),
        })?;
        Ok(ExternalIdentity::try_from(info)?)
    }
}
