//! Message sink: SMTP (STARTTLS) mail with the artifact as attachment.

use super::{Ack, Transport, TransportError};
use crate::config::{ConfigError, EmailSettings};
use crate::sync::packager::SyncPackage;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};
use std::time::Duration;
use tracing::info;

pub struct EmailTransport {
    settings: EmailSettings,
    from: Mailbox,
    to: Mailbox,
    mailer: SmtpTransport,
}

fn invalid(field: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

impl EmailTransport {
    pub fn new(settings: EmailSettings, timeout: Duration) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("transport.smtp_server", &settings.smtp_server),
            ("transport.sender_email", &settings.sender_email),
            ("transport.sender_password", &settings.sender_password),
            ("transport.recipient_email", &settings.recipient_email),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "email configuration incomplete"));
            }
        }
        let from: Mailbox = settings
            .sender_email
            .parse()
            .map_err(|e| invalid("transport.sender_email", e))?;
        let to: Mailbox = settings
            .recipient_email
            .parse()
            .map_err(|e| invalid("transport.recipient_email", e))?;
        let mailer = SmtpTransport::starttls_relay(&settings.smtp_server)
            .map_err(|e| invalid("transport.smtp_server", e))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.sender_email.clone(),
                settings.sender_password.clone(),
            ))
            .timeout(Some(timeout))
            .build();
        Ok(Self {
            settings,
            from,
            to,
            mailer,
        })
    }

    fn message(&self, package: &SyncPackage) -> Result<Message, TransportError> {
        let m = &package.manifest;
        let body = format!(
            "Security Monitor Data Report\n\n\
             Computer: {}\n\
             Timestamp: {}\n\
             Data Points: {}\n\
             File Size: {}\n\n\
             This is an automated message from the security monitor agent.\n",
            m.host_id,
            m.built_at.format("%Y-%m-%d %H:%M:%S"),
            m.entry_count,
            super::human_size(package.size()),
        );
        let zip = ContentType::parse("application/zip")
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("{} Data from {}", self.settings.subject_prefix, m.host_id))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(Attachment::new(package.file_name.clone()).body(package.bytes.clone(), zip)),
            )
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

impl Transport for EmailTransport {
    fn name(&self) -> &'static str {
        "email"
    }

    fn send(&self, package: &SyncPackage) -> Result<Ack, TransportError> {
        let message = self.message(package)?;
        let response = self.mailer.send(&message).map_err(|e| {
            if e.is_permanent() {
                TransportError::Rejected(e.to_string())
            } else {
                TransportError::Unreachable(e.to_string())
            }
        })?;
        info!(
            recipient = %self.settings.recipient_email,
            entries = package.manifest.entry_count,
            "package delivered via email"
        );
        Ok(Ack {
            transport: self.name(),
            detail: response.code().to_string(),
        })
    }
}
