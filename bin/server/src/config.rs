//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys
//! use a double underscore (`SESSION__TTL_HOURS`).

use serde::Deserialize;
use std::fmt;

use gradebook_platform_access::LEGACY_SALT;

/// Secret used when `CIPHER__SECRET` is absent outside production.
const DEVELOPMENT_CIPHER_SECRET: &str = "gradebook-development-secret";

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Socket address to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,

    /// Origin of the single-page client, used for redirects and CORS.
    #[serde(default = "default_front_url")]
    pub front_url: String,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Google OAuth configuration.
    #[serde(default)]
    pub google: GoogleOAuthConfig,

    /// Refresh token encryption configuration.
    #[serde(default)]
    pub cipher: CipherConfig,

    /// SMTP configuration for invitation emails.
    #[serde(default)]
    pub smtp: SmtpConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0:8010".to_string()
}

fn default_front_url() -> String {
    "http://localhost:5173".to_string()
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in hours, absolute from creation.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }
}

/// Google OAuth client credentials. All optional; sign-in is unavailable
/// until all three are set.
#[derive(Clone, Default, Deserialize)]
pub struct GoogleOAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
}

impl fmt::Debug for GoogleOAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}

/// Key derivation inputs for the credential cipher.
#[derive(Clone, Default, Deserialize)]
pub struct CipherConfig {
    pub secret: Option<String>,
    pub salt: Option<String>,
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("salt", &self.salt.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Resolved cipher key inputs.
pub struct CipherKeyMaterial {
    pub secret: String,
    pub salt: String,
    /// True if a development fallback was used.
    pub fallback: bool,
}

impl CipherConfig {
    /// Resolves the secret and salt for the given environment.
    ///
    /// # Errors
    ///
    /// Returns an error in production if either value is missing.
    pub fn resolve(&self, environment: Environment) -> Result<CipherKeyMaterial, config::ConfigError> {
        let secret = self.secret.clone().filter(|s| !s.is_empty());
        let salt = self.salt.clone().filter(|s| !s.is_empty());

        match (secret, salt) {
            (Some(secret), Some(salt)) => Ok(CipherKeyMaterial {
                secret,
                salt,
                fallback: false,
            }),
            _ if environment.is_production() => Err(config::ConfigError::Message(
                "CIPHER__SECRET and CIPHER__SALT are required in production".to_string(),
            )),
            (secret, salt) => Ok(CipherKeyMaterial {
                secret: secret.unwrap_or_else(|| DEVELOPMENT_CIPHER_SECRET.to_string()),
                salt: salt.unwrap_or_else(|| LEGACY_SALT.to_string()),
                fallback: true,
            }),
        }
    }
}

/// SMTP configuration. Without a host, invitations are logged instead of sent.
#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_smtp_port(),
            user: None,
            password: None,
            from: None,
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .finish()
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if the session lifetime is not positive or the
    /// cipher is not configured for production.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.session.ttl_hours <= 0 {
            return Err(config::ConfigError::Message(
                "SESSION__TTL_HOURS must be positive".to_string(),
            ));
        }
        self.cipher.resolve(self.environment)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_has_correct_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.ttl_hours, 24);
        assert_eq!(config.cleanup_interval_seconds, 300);
        assert!(config.secure_cookies);
        assert_eq!(config.ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn production_requires_cipher_secret_and_salt() {
        let partial = CipherConfig {
            secret: Some("s3cret".to_string()),
            salt: None,
        };
        assert!(partial.resolve(Environment::Production).is_err());

        let full = CipherConfig {
            secret: Some("s3cret".to_string()),
            salt: Some("per-deployment".to_string()),
        };
        let material = full.resolve(Environment::Production).unwrap();
        assert_eq!(material.salt, "per-deployment");
        assert!(!material.fallback);
    }

    #[test]
    fn development_falls_back_to_legacy_salt() {
        let material = CipherConfig::default()
            .resolve(Environment::Development)
            .unwrap();
        assert_eq!(material.salt, LEGACY_SALT);
        assert!(material.fallback);
    }

    #[test]
    fn environment_parses_lowercase_names() {
        let env: Environment = serde_json::from_str("\"production\"").unwrap();
        assert!(env.is_production());
        assert_eq!(Environment::default(), Environment::Development);
    }

    #[test]
    fn debug_redacts_secrets() {
        let smtp = SmtpConfig {
            password: Some("hunter2".to_string()),
            ..SmtpConfig::default()
        };
        let google = GoogleOAuthConfig {
            client_secret: Some("client-secret".to_string()),
            ..GoogleOAuthConfig::default()
        };
        assert!(!format!("{smtp:?}").contains("hunter2"));
        assert!(!format!("{google:?}").contains("client-secret"));
    }
}
