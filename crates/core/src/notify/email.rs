//! Email alert sender via SMTP.
//!
//! Uses the `lettre` crate to send HTML-formatted alert emails.

use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use crate::errors::NotificationError;

const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP email notifier.
pub struct EmailNotifier {
    smtp_addr: String,
    from: String,
    recipients: Vec<String>,
    credentials: Option<(String, String)>,
}

impl EmailNotifier {
    /// Create a new email notifier.
    ///
    /// `smtp_addr` should be `host:port` (e.g. `smtp.example.com:587`).
    pub fn new(smtp_addr: String, from: String, recipients: Vec<String>) -> Self {
        info!(
            smtp = %smtp_addr,
            from = %from,
            recipients = ?recipients,
            "initializing email notifier"
        );
        Self {
            smtp_addr,
            from,
            recipients,
            credentials: None,
        }
    }

    /// Authenticate against the relay with a user name and password.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    /// Send an HTML email to all configured recipients.
    pub async fn send(&self, subject: &str, html_body: &str) -> Result<(), NotificationError> {
        debug!(subject, to = ?self.recipients, "sending email");

        let from_mailbox: Mailbox = self
            .from
            .parse()
            .map_err(|e| NotificationError::EmailError(format!("invalid from address: {}", e)))?;

        let transport = self.build_transport()?;

        for recipient in &self.recipients {
            let to_mailbox: Mailbox = recipient.parse().map_err(|e| {
                NotificationError::EmailError(format!("invalid recipient '{}': {}", recipient, e))
            })?;

            let email = Message::builder()
                .from(from_mailbox.clone())
                .to(to_mailbox)
                .subject(subject)
                .header(ContentType::TEXT_HTML)
                .body(html_body.to_string())
                .map_err(|e| {
                    NotificationError::EmailError(format!("failed to build email: {}", e))
                })?;

            match transport.send(email).await {
                Ok(_) => {
                    info!(to = %recipient, "email sent successfully");
                }
                Err(e) => {
                    warn!(to = %recipient, error = %e, "failed to send email");
                    return Err(NotificationError::EmailError(format!(
                        "SMTP send to '{}' failed: {}",
                        recipient, e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Split `host:port`, defaulting the port to 587.
    fn host_and_port(&self) -> (&str, u16) {
        match self.smtp_addr.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_SMTP_PORT)),
            None => (self.smtp_addr.as_str(), DEFAULT_SMTP_PORT),
        }
    }

    /// Build a STARTTLS transport, authenticated when credentials are set.
    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let (host, port) = self.host_and_port();

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotificationError::EmailError(format!("SMTP connection error: {}", e)))?
            .port(port);

        if let Some((ref username, ref password)) = self.credentials {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_notifier_construction() {
        let notifier = EmailNotifier::new(
            "smtp.example.com:2525".into(),
            "sync@example.com".into(),
            vec!["admin@example.com".into()],
        );
        assert_eq!(notifier.from, "sync@example.com");
        assert_eq!(notifier.recipients.len(), 1);
        assert_eq!(notifier.host_and_port(), ("smtp.example.com", 2525));
        assert!(notifier.credentials.is_none());
    }

    #[test]
    fn test_host_without_port_defaults() {
        let notifier = EmailNotifier::new("smtp.example.com".into(), "a@x.com".into(), vec![])
            .with_credentials("user".into(), "pw".into());
        assert_eq!(notifier.host_and_port(), ("smtp.example.com", 587));
        assert!(notifier.credentials.is_some());
    }
}
