//! Outbound collaborator interfaces: the mailer, the ads conversion
//! transport, and the credential provider that feeds it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{cart::ConversionEventType, event::LineItem};

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Clone, Default)]
pub struct MailReceipt {
    pub external_message_id: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<MailReceipt>;
}

/// Canonical conversion event handed to the ads transport. Hashing of
/// customer data and wire encoding are the transport's job.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionEvent {
    pub event_type: ConversionEventType,
    /// Fresh per attempt; the ads platform deduplicates on it.
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    pub value: f64,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub event_source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionCredentials {
    pub pixel_id: String,
    pub access_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub test_event_code: Option<String>,
}

impl ConversionCredentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[async_trait]
pub trait ConversionTransport: Send + Sync + 'static {
    /// Report one event. Returns the platform-side event id on success.
    async fn report(
        &self,
        credentials: &ConversionCredentials,
        event: &ConversionEvent,
    ) -> anyhow::Result<String>;
}

/// Precondition failures. None of these are retried within a pass.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no ads credentials configured for user {0}")]
    Missing(String),

    #[error("ads access token expired for user {0}")]
    Expired(String),

    #[error("no ads account id configured for user {0}")]
    Unconfigured(String),

    #[error("credential lookup failed: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    /// Return a usable, non-expired credential set for `user_id`.
    async fn credentials_for(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversionCredentials, CredentialError>;
}
