//! Invitation email delivery.
//!
//! [`SmtpMailer`] sends through `lettre`'s async SMTP transport when
//! `SMTP__HOST` is configured; otherwise [`LogMailer`] records the
//! invitation in the log.

use async_trait::async_trait;
use gradebook_platform_access::{InvitationMailer, MailError, Role};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use rootcause::Report;
use tracing::info;

use crate::config::SmtpConfig;

/// Invitation subject line.
const INVITATION_SUBJECT: &str = "Invitation to the Gradebook platform";

/// Sender used when `SMTP__FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@gradebook.local";

fn invitation_body(front_url: &str, role: Role) -> String {
    format!(
        "<p>You have been invited to the Gradebook platform as {role}.</p>\n\
         <p><a href=\"{front_url}\">Sign in with Google</a></p>"
    )
}

/// Sends invitation emails over SMTP.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    front_url: String,
}

impl SmtpMailer {
    /// Builds a mailer for the configured relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is missing, the relay cannot be
    /// configured, or the sender address is invalid.
    pub fn new(config: &SmtpConfig, front_url: &str) -> Result<Self, Report<MailError>> {
        let host = config.host.as_deref().ok_or_else(|| MailError::Transport {
            reason: "SMTP host is not configured".to_string(),
        })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| MailError::Transport {
                reason: e.to_string(),
            })?
            .port(config.port);
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let from = config
            .from
            .as_deref()
            .or(config.user.as_deref())
            .unwrap_or(DEFAULT_FROM_ADDRESS)
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address {
                reason: e.to_string(),
            })?;

        Ok(Self {
            transport: builder.build(),
            from,
            front_url: front_url.to_string(),
        })
    }
}

#[async_trait]
impl InvitationMailer for SmtpMailer {
    async fn send_invitation(&self, email: &str, role: Role) -> Result<(), Report<MailError>> {
        let to = email.parse::<Mailbox>().map_err(|e| MailError::Address {
            reason: e.to_string(),
        })?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(INVITATION_SUBJECT)
            .header(ContentType::TEXT_HTML)
            .body(invitation_body(&self.front_url, role))
            .map_err(|e| MailError::Build {
                reason: e.to_string(),
            })?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport {
                reason: e.to_string(),
            })?;

        info!(to = email, role = %role, "invitation email sent");
        Ok(())
    }
}

/// Logs invitations instead of sending them.
pub struct LogMailer {
    front_url: String,
}

impl LogMailer {
    #[must_use]
    pub fn new(front_url: &str) -> Self {
        Self {
            front_url: front_url.to_string(),
        }
    }
}

#[async_trait]
impl InvitationMailer for LogMailer {
    async fn send_invitation(&self, email: &str, role: Role) -> Result<(), Report<MailError>> {
        info!(to = email, role = %role, link = %self.front_url, "SMTP not configured, invitation not emailed");
        Ok(())
    }
}
