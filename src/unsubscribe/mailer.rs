//! SMTP delivery of mailto unsubscribe requests

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use tracing::info;

use super::MailSender;
use crate::config::SmtpConfig;
use crate::error::{Result, TriageError};

/// Sends through an authenticated SMTP relay that is separate from the
/// mailboxes being managed
pub struct SmtpMailSender {
    host: String,
    port: u16,
    username: String,
    password: String,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpMailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailSender")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from", &self.from.to_string())
            .finish()
    }
}

impl SmtpMailSender {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        from: &str,
    ) -> Result<Self> {
        let from = parse_mailbox(from)?;
        Ok(Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            from,
        })
    }

    /// Build from config. `Ok(None)` when no relay is configured.
    pub fn from_config(config: &SmtpConfig) -> Result<Option<Self>> {
        if !config.is_configured() {
            return Ok(None);
        }
        let password = std::env::var(&config.password_env).map_err(|_| {
            TriageError::Config(format!("{} not set", config.password_env))
        })?;
        Self::new(
            config.host.clone(),
            config.port,
            config.username.clone(),
            password,
            &config.from,
        )
        .map(Some)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let tls_parameters = TlsParameters::new(self.host.clone())
            .map_err(|e| TriageError::Config(format!("SMTP TLS setup failed: {}", e)))?;
        // 465 is implicit TLS, everything else upgrades with STARTTLS
        let builder = if self.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
                .port(self.port)
                .tls(Tls::Wrapper(tls_parameters))
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
                .port(self.port)
                .tls(Tls::Required(tls_parameters))
        };
        let credentials = Credentials::new(self.username.clone(), self.password.clone());
        Ok(builder.credentials(credentials).build())
    }
}

fn parse_mailbox(input: &str) -> Result<Mailbox> {
    input
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| TriageError::Validation(format!("Invalid address '{}': {}", input, e)))
}

/// Assemble the plain-text request message
pub fn build_request(from: &Mailbox, to: &str, subject: &str, body: &str) -> Result<Message> {
    Message::builder()
        .from(from.clone())
        .to(parse_mailbox(to)?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| TriageError::Automation(format!("Could not build message: {}", e)))
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = build_request(&self.from, to, subject, body)?;
        let transport = self.transport()?;

        transport
            .send(message)
            .await
            .map_err(|e| TriageError::Automation(format!("SMTP send failed: {}", e)))?;

        info!(to, "Unsubscribe request sent");
        Ok(())
    }
}
