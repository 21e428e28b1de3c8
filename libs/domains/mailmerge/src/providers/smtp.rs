//! SMTP email provider implementation using lettre.
//!
//! Messages are composed by this crate, so the provider only hands raw bytes
//! and an explicit envelope to lettre. The pool feature is not enabled:
//! every send opens, authenticates, transmits and closes its own connection.

use super::EmailProvider;
use crate::error::{MailMergeError, MailMergeResult};
use async_trait::async_trait;
use lettre::{
    address::Envelope, transport::smtp::authentication::Credentials, Address, AsyncSmtpTransport,
    AsyncTransport, Tokio1Executor,
};
use std::time::Duration;
use tracing::{debug, error};

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain text, for local capture servers such as Mailpit.
    None,
    /// Upgrade with STARTTLS (submission port 587).
    StartTls,
    /// TLS from the first byte (port 465).
    Implicit,
}

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// SMTP username (optional for dev servers).
    pub username: Option<String>,
    /// SMTP password (optional for dev servers).
    pub password: Option<String>,
    /// Connection security.
    pub tls: TlsMode,
    /// Per-command network timeout; lettre's default applies when unset.
    pub timeout: Option<Duration>,
}

impl SmtpConfig {
    /// Create a new SMTP configuration using STARTTLS.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: TlsMode::StartTls,
            timeout: None,
        }
    }

    /// Gmail submission relay, authenticated as `username`.
    pub fn gmail(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new("smtp.gmail.com", 587).with_credentials(username, password)
    }

    /// Outlook submission relay, authenticated as `username`.
    pub fn outlook(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new("smtp-mail.outlook.com", 587).with_credentials(username, password)
    }

    /// Builder method to set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Builder method to set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Builder method to set the network timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port` of the relay.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
}

impl SmtpProvider {
    /// Create a new SMTP provider.
    pub fn new(config: SmtpConfig) -> MailMergeResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self { transport, config })
    }

    /// Relay configuration in use.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn build_transport(config: &SmtpConfig) -> MailMergeResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = match config.tls {
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| {
                    MailMergeError::Configuration(format!("Failed to create SMTP relay: {}", e))
                })?,
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| {
                    MailMergeError::Configuration(format!("Failed to create SMTP relay: {}", e))
                })?,
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };

        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        if config.timeout.is_some() {
            builder = builder.timeout(config.timeout);
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, from: &Address, to: &Address, message: &[u8]) -> MailMergeResult<()> {
        debug!(
            to = %to,
            server = %self.config.server_address(),
            size = message.len(),
            "Sending email via SMTP"
        );

        let envelope = Envelope::new(Some(from.clone()), vec![to.clone()])
            .map_err(|e| MailMergeError::Transport(format!("invalid envelope: {}", e)))?;

        self.transport
            .send_raw(&envelope, message)
            .await
            .map_err(|e| {
                error!(to = %to, error = %e, "SMTP send failed");
                MailMergeError::from(e)
            })?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }

    async fn health_check(&self) -> MailMergeResult<()> {
        let reachable = self.transport.test_connection().await?;
        if reachable {
            Ok(())
        } else {
            Err(MailMergeError::Transport(format!(
                "SMTP server {} did not accept the connection",
                self.config.server_address()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gmail_preset() {
        let config = SmtpConfig::gmail("user@gmail.com", "password");
        assert_eq!(config.server_address(), "smtp.gmail.com:587");
        assert_eq!(config.username.as_deref(), Some("user@gmail.com"));
        assert_eq!(config.password.as_deref(), Some("password"));
        assert_eq!(config.tls, TlsMode::StartTls);
    }

    #[test]
    fn test_outlook_preset() {
        let config = SmtpConfig::outlook("user@outlook.com", "password");
        assert_eq!(config.server_address(), "smtp-mail.outlook.com:587");
    }

    #[test]
    fn test_custom_host_and_port() {
        let config = SmtpConfig::gmail("user@gmail.com", "password")
            .with_host("smtp.custom.com")
            .with_port(2525);
        assert_eq!(config.server_address(), "smtp.custom.com:2525");
        assert_eq!(config.username.as_deref(), Some("user@gmail.com"));
    }

    #[test]
    fn test_new_has_no_credentials() {
        let config = SmtpConfig::new("localhost", 1025).with_tls(TlsMode::None);
        assert_eq!(config.username, None);
        assert_eq!(config.tls, TlsMode::None);
    }

    #[tokio::test]
    async fn test_provider_builds_for_every_tls_mode() {
        for tls in [TlsMode::None, TlsMode::StartTls, TlsMode::Implicit] {
            let config = SmtpConfig::new("localhost", 1025)
                .with_tls(tls)
                .with_timeout(Duration::from_secs(5));
            let provider = SmtpProvider::new(config).unwrap();
            assert_eq!(provider.name(), "SMTP");
            assert_eq!(provider.config().tls, tls);
        }
    }

    #[tokio::test]
    async fn test_send_to_closed_port_is_transport_error() {
        let config = SmtpConfig::new("127.0.0.1", 1)
            .with_tls(TlsMode::None)
            .with_timeout(Duration::from_secs(2));
        let provider = SmtpProvider::new(config).unwrap();

        let from: Address = "sender@example.com".parse().unwrap();
        let to: Address = "a@x.com".parse().unwrap();
        let err = provider.send(&from, &to, b"Subject: hi\r\n\r\nbody").await.unwrap_err();
        assert!(matches!(err, MailMergeError::Transport(_)));
    }
}
