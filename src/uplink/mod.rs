//! Delivery of sync packages to the remote collector. Two interchangeable
//! sinks share [`Transport`]: SMTP message with attachment, and HTTP multipart.
//!
//! A failed `send` leaves nothing on the remote side to clean up: the email
//! is only accepted once the SMTP transaction completes, the webhook only
//! once the server answers with success.

mod email;
mod webhook;

use crate::config::{ConfigError, TransportConfig};
use crate::sync::packager::SyncPackage;
use std::time::Duration;
use thiserror::Error;

pub use email::EmailTransport;
pub use webhook::WebhookTransport;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Timeout, refused connection, DNS failure: transient, retry next cycle
    #[error("collector unreachable: {0}")]
    Unreachable(String),
    /// The endpoint answered with an explicit failure: likely misconfiguration
    #[error("collector rejected delivery: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, TransportError::Rejected(_))
    }
}

/// Positive acknowledgement from the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub transport: &'static str,
    pub detail: String,
}

pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, package: &SyncPackage) -> Result<Ack, TransportError>;
}

/// Build the configured sink. `timeout` bounds one whole delivery.
pub fn build(config: &TransportConfig, timeout: Duration) -> Result<Box<dyn Transport>, ConfigError> {
    Ok(match config {
        TransportConfig::Email(settings) => Box::new(EmailTransport::new(settings.clone(), timeout)?),
        TransportConfig::Webhook(settings) => Box::new(WebhookTransport::new(settings, timeout)?),
    })
}

fn human_size(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}
