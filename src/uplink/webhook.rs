//! HTTP sink: multipart request carrying manifest fields and the artifact.

use super::{Ack, Transport, TransportError};
use crate::config::{ConfigError, WebhookSettings};
use crate::sync::packager::SyncPackage;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::time::Duration;
use tracing::info;

pub struct WebhookTransport {
    client: reqwest::blocking::Client,
    url: String,
    method: Method,
    headers: HeaderMap,
}

fn invalid(field: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

impl WebhookTransport {
    pub fn new(settings: &WebhookSettings, timeout: Duration) -> Result<Self, ConfigError> {
        let url = settings.url.trim();
        if url.is_empty() {
            return Err(invalid("transport.url", "webhook URL not configured"));
        }
        reqwest::Url::parse(url).map_err(|e| invalid("transport.url", e))?;
        let method = Method::from_bytes(settings.method.trim().to_uppercase().as_bytes())
            .map_err(|e| invalid("transport.method", e))?;
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid("transport.headers", e))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid("transport.headers", e))?;
            headers.insert(name, value);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| invalid("transport", e))?;
        Ok(Self {
            client,
            url: url.to_string(),
            method,
            headers,
        })
    }

    fn form(package: &SyncPackage) -> Result<Form, TransportError> {
        let m = &package.manifest;
        let file = Part::bytes(package.bytes.clone())
            .file_name(package.file_name.clone())
            .mime_str("application/zip")
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        Ok(Form::new()
            .text("computer_id", m.host_id.clone())
            .text("host_id", m.host_id.clone())
            .text("timestamp", m.built_at.to_rfc3339())
            .text("built_at", m.built_at.to_rfc3339())
            .text("data_points", m.entry_count.to_string())
            .text("entry_count", m.entry_count.to_string())
            .text("batch_sha256", m.batch_sha256.clone())
            .part("file", file))
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::Rejected(err.to_string())
    } else {
        TransportError::Unreachable(err.to_string())
    }
}

impl Transport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send(&self, package: &SyncPackage) -> Result<Ack, TransportError> {
        let res = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .multipart(Self::form(package)?)
            .send()
            .map_err(classify)?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().unwrap_or_default();
            return Err(TransportError::Rejected(format!("{} {}", status, text.trim())));
        }
        info!(
            url = %self.url,
            entries = package.manifest.entry_count,
            size = %super::human_size(package.size()),
            "package delivered via webhook"
        );
        Ok(Ack {
            transport: self.name(),
            detail: status.to_string(),
        })
    }
}
