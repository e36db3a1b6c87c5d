/// Outbound email
///
/// Delivery goes through the [`Mailer`] trait. [`SmtpMailer`] talks to a real SMTP
/// relay with lettre; [`LogMailer`] only writes the message to the log and is used
/// when no mail credentials are configured. [`MemoryMailer`] keeps sent messages
/// in memory for tests.
///
/// Sending happens after the request's transaction commits. Callers log failures
/// and carry on.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Failed to create SMTP transport: {0}")]
    Transport(String),

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to send email: {0}")]
    Send(String),
}

/// A plain-text message to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;

    /// Short name for startup logs
    fn kind(&self) -> &'static str;
}

/// SMTP settings, read from the `MAIL_*` environment variables
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Falls back to `username` when unset
    pub default_sender: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 587,
            use_tls: true,
            username: None,
            password: None,
            default_sender: None,
        }
    }
}

impl MailConfig {
    /// Sender address, if one can be derived
    pub fn sender(&self) -> Option<&str> {
        self.default_sender
            .as_deref()
            .or(self.username.as_deref())
    }
}

/// Picks the SMTP mailer when a username is configured, otherwise the log mailer
pub fn build_mailer(config: &MailConfig, app_name: &str) -> Result<Arc<dyn Mailer>, MailError> {
    if config.username.is_none() {
        tracing::warn!("MAIL_USERNAME is not configured; emails will be logged only");
        return Ok(Arc::new(LogMailer));
    }

    Ok(Arc::new(SmtpMailer::from_config(config, app_name)?))
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig, app_name: &str) -> Result<Self, MailError> {
        let sender = config
            .sender()
            .ok_or_else(|| MailError::InvalidAddress("no sender configured".to_string()))?;

        let from = format!("{} <{}>", app_name, sender)
            .parse::<Mailbox>()
            .or_else(|_| sender.parse::<Mailbox>())
            .map_err(|_| MailError::InvalidAddress(sender.to_string()))?;

        let creds = Credentials::new(
            config.username.clone().unwrap_or_default(),
            config.password.clone().unwrap_or_default(),
        );

        let transport = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
                .map_err(|e| MailError::Transport(e.to_string()))?
                .port(config.port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
                .port(config.port)
                .credentials(creds)
                .build()
        };

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let to = email
            .to
            .parse::<Mailbox>()
            .map_err(|_| MailError::InvalidAddress(email.to.clone()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(e.to_string()))?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "smtp"
    }
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.body,
            "Email not sent (no mail credentials)"
        );
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}

/// Records messages in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().await.push(email.clone());
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// Message carrying a one-time verification code
pub fn otp_email(
    app_name: &str,
    to: &str,
    name: &str,
    code: &str,
    expiration_minutes: i64,
) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("{} verification code", app_name),
        body: format!(
            "Hello {},\n\nYour verification code is {}.\n\
             It expires in {} minutes.\n\n\
             If you did not request this code, you can ignore this email.",
            name, code, expiration_minutes
        ),
    }
}

/// Message telling a user they were invited to a project
pub fn invitation_email(to: &str, invitee_name: &str, inviter_name: &str, project_name: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("You've been invited to {}", project_name),
        body: format!(
            "Hello {},\n\n{} invited you to collaborate on '{}'.\n\
             Visit your dashboard to respond to this invitation.",
            invitee_name, inviter_name, project_name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_falls_back_to_username() {
        let mut config = MailConfig::default();
        assert_eq!(config.sender(), None);

        config.username = Some("bot@example.com".to_string());
        assert_eq!(config.sender(), Some("bot@example.com"));

        config.default_sender = Some("noreply@example.com".to_string());
        assert_eq!(config.sender(), Some("noreply@example.com"));
    }

    #[test]
    fn test_build_mailer_without_username_logs() {
        let mailer = build_mailer(&MailConfig::default(), "Taskdeck").unwrap();
        assert_eq!(mailer.kind(), "log");
    }

    #[tokio::test]
    async fn test_memory_mailer_records() {
        let mailer = MemoryMailer::new();
        let email = otp_email("Taskdeck", "a@x.com", "Ada", "123456", 10);

        mailer.send(&email).await.unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert!(sent[0].body.contains("123456"));
        assert!(sent[0].body.contains("10 minutes"));
    }

    #[test]
    fn test_invitation_email() {
        let email = invitation_email("b@x.com", "Bea", "Ada", "Site Launch");
        assert_eq!(email.subject, "You've been invited to Site Launch");
        assert!(email.body.contains("Ada invited you to collaborate on 'Site Launch'"));
    }
}
