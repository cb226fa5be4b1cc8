use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use reclaim_core::{
    config::SmtpConfig,
    normalize::is_valid_email,
    transport::{MailReceipt, Mailer, OutgoingEmail},
};

fn mailbox(email: &str, name: Option<&str>) -> Result<Mailbox> {
    let address: Address = email
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid address {email:?}: {e}"))?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

/// Build the multipart message and the Message-ID it carries.
pub(crate) fn build_message(email: &OutgoingEmail) -> Result<(Message, String)> {
    if !is_valid_email(&email.to) {
        bail!("invalid recipient address");
    }
    let from = mailbox(&email.from_email, email.from_name.as_deref())?;
    let domain = email
        .from_email
        .split_once('@')
        .map(|(_, d)| d.trim())
        .unwrap_or("localhost");
    let message_id = format!("<{}@{}>", uuid::Uuid::new_v4().simple(), domain);

    let mut builder = Message::builder()
        .message_id(Some(message_id.clone()))
        .from(from)
        .to(mailbox(&email.to, None)?)
        .subject(email.subject.clone());
    if let Some(reply_to) = email.reply_to.as_deref() {
        builder = builder.reply_to(mailbox(reply_to, None)?);
    }
    let message = builder
        .multipart(MultiPart::alternative_plain_html(
            email.text_body.clone(),
            email.html_body.clone(),
        ))
        .map_err(|e| anyhow!("smtp message build failed: {e}"))?;
    Ok((message, message_id))
}

/// Recovery-email transport over SMTP.
pub struct SmtpMailer {
    config: SmtpConfig,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<MailReceipt> {
        let (message, message_id) = build_message(email)?;
        if self.config.noop {
            info!(
                message_id = %message_id,
                "SMTP noop transport enabled; marking email as sent without network dispatch"
            );
            return Ok(MailReceipt {
                external_message_id: Some(message_id),
            });
        }

        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| anyhow!("smtp host is not configured"))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(self.config.port)
            .timeout(Some(self.timeout));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        builder
            .build()
            .send(message)
            .await
            .map_err(|e| anyhow!("smtp send failed: {e}"))?;
        Ok(MailReceipt {
            external_message_id: Some(message_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            to: "jo@example.com".to_string(),
            from_email: "hello@shop.example.com".to_string(),
            from_name: Some("Linen & Co".to_string()),
            reply_to: Some("support@shop.example.com".to_string()),
            subject: "You left something in your cart".to_string(),
            html_body: "<p>Come back</p>".to_string(),
            text_body: "Come back".to_string(),
        }
    }

    #[test]
    fn message_carries_both_bodies_and_reply_to() {
        let (message, message_id) = build_message(&email()).expect("build");
        assert!(message_id.ends_with("@shop.example.com>"));
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("Reply-To: support@shop.example.com"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Come back"));
        assert!(raw.contains(&message_id));
    }

    #[tokio::test]
    async fn noop_transport_returns_a_message_id() {
        let mailer = SmtpMailer::new(
            SmtpConfig {
                noop: true,
                ..SmtpConfig::default()
            },
            Duration::from_secs(1),
        );
        let receipt = mailer.send(&email()).await.expect("noop send");
        assert!(receipt.external_message_id.is_some());
    }

    #[tokio::test]
    async fn missing_host_fails_the_send() {
        let mailer = SmtpMailer::new(SmtpConfig::default(), Duration::from_secs(1));
        let err = mailer.send(&email()).await.expect_err("no host");
        assert!(err.to_string().contains("smtp host is not configured"));
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected_before_dispatch() {
        let mailer = SmtpMailer::new(
            SmtpConfig {
                noop: true,
                ..SmtpConfig::default()
            },
            Duration::from_secs(1),
        );
        for to in ["not-an-address", "jo@localhost", "@example.com"] {
            let mut bad = email();
            bad.to = to.to_string();
            assert!(mailer.send(&bad).await.is_err(), "{to}");
        }
    }
}
