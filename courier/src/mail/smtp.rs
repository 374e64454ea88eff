//! SMTP mail transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, Message, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::MailTransport;
use crate::{Error, Result};

/// SMTP connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server host. Empty disables delivery (log only).
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Use STARTTLS instead of implicit TLS.
    pub starttls: bool,
    /// Sender mailbox, e.g. `Courier <noreply@example.com>`.
    pub from: String,
    /// Upper bound for a single send.
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: None,
            password: None,
            starttls: true,
            from: String::new(),
            timeout_secs: 30,
        }
    }
}

impl SmtpConfig {
    pub fn is_enabled(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

struct Relay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// lettre-backed [`MailTransport`].
///
/// Without a configured host the transport runs in no-op mode: messages are
/// logged and acknowledged with a synthetic delivery id.
#[derive(Clone)]
pub struct SmtpMailTransport {
    relay: Option<Arc<Relay>>,
    timeout: Duration,
}

impl SmtpMailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));

        if !config.is_enabled() {
            warn!("SMTP host not configured; mail transport will operate in no-op mode");
            return Ok(Self {
                relay: None,
                timeout,
            });
        }

        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| Error::config(format!("Invalid SMTP_FROM address: {}", e)))?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| Error::config(format!("Failed to configure SMTP transport: {}", e)))?
        .port(config.port)
        .timeout(Some(timeout));

        let builder = if let (Some(username), Some(password)) = (&config.username, &config.password)
        {
            builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            builder
        };

        info!(host = %config.host, port = config.port, "SMTP transport configured");

        Ok(Self {
            relay: Some(Arc::new(Relay {
                transport: builder.build(),
                from,
            })),
            timeout,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.relay.is_some()
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String> {
        let Some(relay) = &self.relay else {
            let delivery_id = format!("noop-{}", uuid::Uuid::new_v4());
            info!(
                recipient = to,
                subject,
                delivery_id = %delivery_id,
                "Mail transport in no-op mode; skipping actual send"
            );
            return Ok(delivery_id);
        };

        let recipient = to
            .parse::<Mailbox>()
            .map_err(|e| Error::transport(format!("Invalid recipient address '{}': {}", to, e)))?;

        let email = Message::builder()
            .from(relay.from.clone())
            .to(recipient)
            .subject(subject)
            .header(header::ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| Error::transport(format!("Failed to build email message: {}", e)))?;

        let response = tokio::time::timeout(self.timeout, relay.transport.send(email))
            .await
            .map_err(|_| {
                Error::transport(format!("SMTP send timed out after {:?}", self.timeout))
            })?
            .map_err(|e| Error::transport(format!("Failed to send email: {}", e)))?;

        let delivery_id = response
            .first_line()
            .map(str::to_string)
            .unwrap_or_else(|| response.code().to_string());
        debug!(recipient = to, subject, delivery_id = %delivery_id, "Email sent");
        Ok(delivery_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_disabled() {
        let config = SmtpConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.port, 587);
        assert!(config.starttls);
    }

    #[tokio::test]
    async fn test_noop_transport_acknowledges() {
        let transport = SmtpMailTransport::new(&SmtpConfig::default()).unwrap();
        assert!(!transport.is_enabled());

        let id = transport
            .send("ada@example.com", "Hi", "<p>hello</p>")
            .await
            .unwrap();
        assert!(id.starts_with("noop-"));
    }

    #[test]
    fn test_invalid_from_is_config_error() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            from: "not an address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SmtpMailTransport::new(&config),
            Err(Error::Configuration(_))
        ));
    }
}
