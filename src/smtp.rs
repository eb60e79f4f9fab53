//! `SmtpRelay`: forwards delivered SMS as e-mail over implicit-TLS SMTP.

use std::sync::Mutex;
use std::time::Duration;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, warn};

use crate::error::SmtpError;
use crate::health::Health;
use crate::sms::Sms;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub recipient: String,
}

/// Lazily-connected SMTP relay. Implicit TLS only — a configured port 25 is
/// rejected at construction since the upstream client never speaks STARTTLS.
pub struct SmtpRelay {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    health: Mutex<Health>,
}

impl SmtpRelay {
    pub fn new(config: SmtpConfig) -> Result<Self, SmtpError> {
        if config.port == 25 {
            return Err(SmtpError::PlaintextPortUnsupported);
        }

        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| SmtpError::Connect(e.to_string()))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport,
            health: Mutex::new(Health::ok()),
        })
    }

    /// Build a relay that is permanently CRITICAL, for the port-25 case where
    /// we want the gateway to keep running but report the relay as broken
    /// rather than refusing to start entirely.
    #[must_use]
    pub fn disabled(reason: impl Into<String>) -> DisabledRelay {
        DisabledRelay {
            health: Health::critical(reason),
        }
    }

    #[must_use]
    pub fn current_health(&self) -> Health {
        self.health.lock().unwrap().clone()
    }

    /// Recipient e-mail for a delivered SMS: the sending modem's configured
    /// address if it has one, otherwise the pool-wide fallback recipient.
    fn recipient_for(&self, sender_email: Option<&str>) -> String {
        sender_email
            .map(str::to_string)
            .unwrap_or_else(|| self.config.recipient.clone())
    }

    /// Forward a delivered SMS as an e-mail. Retries once in ASCII-escaped
    /// form if the UTF-8 body fails to encode as a message outright.
    pub async fn send(&self, sms: &Sms, sender_email: Option<&str>) -> Result<(), SmtpError> {
        let to = self.recipient_for(sender_email);
        match self.build_and_send(sms, &to, false).await {
            Ok(()) => Ok(()),
            Err(SmtpError::Message(_)) => {
                warn!(sms_id = %sms.id, "SMS body failed to encode as UTF-8 message, retrying ASCII-escaped");
                self.build_and_send(sms, &to, true).await
            }
            Err(e) => Err(e),
        }
    }

    async fn build_and_send(&self, sms: &Sms, to: &str, ascii_escape: bool) -> Result<(), SmtpError> {
        let body = if ascii_escape {
            sms.to_display_string(true).escape_default().to_string()
        } else {
            sms.to_display_string(true)
        };

        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|_| SmtpError::Connect(format!("invalid from address: {}", self.config.from)))?;
        let to: Mailbox = to
            .parse()
            .map_err(|_| SmtpError::Connect(format!("invalid recipient address: {to}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(format!("SMS from {}", sms.sender.as_deref().unwrap_or("unknown")))
            .body(body)?;

        self.transport.send(message).await?;
        *self.health.lock().unwrap() = Health::ok();
        Ok(())
    }

    /// Lightweight connectivity test, run opportunistically by the delivery
    /// task. Categorizes the common failure modes rather than surfacing a raw
    /// transport error.
    pub async fn test_connection(&self) -> Health {
        match self.transport.test_connection().await {
            Ok(true) => {
                let health = Health::ok();
                *self.health.lock().unwrap() = health.clone();
                health
            }
            Ok(false) => {
                let health = Health::critical("SMTP relay did not accept the connection test");
                *self.health.lock().unwrap() = health.clone();
                health
            }
            Err(e) => {
                let message = categorize_smtp_error(&e);
                error!(error = %e, "SMTP relay health check failed");
                let health = Health::critical(message);
                *self.health.lock().unwrap() = health.clone();
                health
            }
        }
    }
}

fn categorize_smtp_error(e: &lettre::transport::smtp::Error) -> &'static str {
    if e.is_permanent() {
        "SMTP relay rejected the HELO/EHLO handshake"
    } else if e.is_transient() {
        "SMTP relay temporarily refused the connection"
    } else if e.is_client() {
        "SMTP relay offered no suitable authentication mechanism"
    } else {
        "SMTP relay connection failed"
    }
}

/// Placeholder relay for the port-25-rejected case: reports CRITICAL forever,
/// never actually attempts a connection.
pub struct DisabledRelay {
    health: Health,
}

impl DisabledRelay {
    #[must_use]
    pub fn current_health(&self) -> Health {
        self.health.clone()
    }
}

/// Fixed backoff applied by the delivery task between
/// redelivery attempts after a send failure.
pub const DELIVERY_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Unifies the connected and permanently-disabled relay shapes behind one
/// type so callers (the RPC health endpoint, the gateway's delivery task)
/// don't need to branch on whether `[mail]` is enabled.
pub enum MailRelay {
    Connected(SmtpRelay),
    Disabled(DisabledRelay),
}

impl MailRelay {
    #[must_use]
    pub fn current_health(&self) -> Health {
        match self {
            MailRelay::Connected(relay) => relay.current_health(),
            MailRelay::Disabled(relay) => relay.current_health(),
        }
    }

    pub async fn send(&self, sms: &Sms, sender_email: Option<&str>) -> Result<(), SmtpError> {
        match self {
            MailRelay::Connected(relay) => relay.send(sms, sender_email).await,
            MailRelay::Disabled(_) => Err(SmtpError::Connect(
                "mail forwarding is disabled".to_string(),
            )),
        }
    }

    pub async fn test_connection(&self) -> Health {
        match self {
            MailRelay::Connected(relay) => relay.test_connection().await,
            MailRelay::Disabled(relay) => relay.current_health(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port,
            username: "gateway".to_string(),
            password: "secret".to_string(),
            from: "gateway@example.com".to_string(),
            recipient: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn port_25_is_rejected_at_construction() {
        let result = SmtpRelay::new(config(25));
        assert!(matches!(result, Err(SmtpError::PlaintextPortUnsupported)));
    }

    #[test]
    fn implicit_tls_port_constructs() {
        let result = SmtpRelay::new(config(465));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().current_health().state, crate::health::HealthState::Ok);
    }

    #[test]
    fn disabled_relay_is_always_critical() {
        let relay = SmtpRelay::disabled("mail forwarding is turned off");
        assert_eq!(relay.current_health().state, crate::health::HealthState::Critical);
    }
}
