//! Meta Conversions API transport.
//!
//! One event per request to `POST {graph}/{pixel_id}/events`. Customer
//! identifiers are normalized and SHA-256 hashed before they leave the
//! process; the access token travels as a query parameter and is never
//! logged.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use reclaim_core::transport::{ConversionCredentials, ConversionEvent, ConversionTransport};

const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events_received: u32,
    #[serde(default)]
    fbtrace_id: Option<String>,
}

fn hash_identifier(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.trim().to_lowercase().as_bytes()))
}

fn first_name(full_name: &str) -> Option<&str> {
    full_name.split_whitespace().next()
}

pub(crate) fn event_payload(event: &ConversionEvent, test_event_code: Option<&str>) -> Value {
    let mut user_data = serde_json::Map::new();
    if let Some(email) = event.customer_email.as_deref() {
        user_data.insert("em".to_string(), json!([hash_identifier(email)]));
    }
    if let Some(name) = event.customer_name.as_deref().and_then(first_name) {
        user_data.insert("fn".to_string(), json!([hash_identifier(name)]));
    }

    let contents: Vec<Value> = event
        .line_items
        .iter()
        .map(|item| {
            json!({
                "id": item.title,
                "quantity": item.quantity,
                "item_price": item.unit_price,
            })
        })
        .collect();
    let num_items: u32 = event.line_items.iter().map(|i| i.quantity).sum();

    let mut payload = json!({
        "data": [{
            "event_name": event.event_type.as_str(),
            "event_time": event.event_time.timestamp(),
            "event_id": event.event_id,
            "action_source": "website",
            "event_source_url": event.event_source_url,
            "user_data": user_data,
            "custom_data": {
                "value": event.value,
                "currency": event.currency,
                "content_type": "product",
                "contents": contents,
                "num_items": num_items,
            }
        }]
    });
    if let Some(code) = test_event_code {
        payload["test_event_code"] = json!(code);
    }
    payload
}

pub struct MetaCapiTransport {
    client: reqwest::Client,
    graph_url: String,
}

impl MetaCapiTransport {
    pub fn new(graph_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("meta client build failed: {e}"))?;
        Ok(Self {
            client,
            graph_url: graph_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ConversionTransport for MetaCapiTransport {
    async fn report(
        &self,
        credentials: &ConversionCredentials,
        event: &ConversionEvent,
    ) -> Result<String> {
        let url = format!("{}/{}/events", self.graph_url, credentials.pixel_id);
        let payload = event_payload(event, credentials.test_event_code.as_deref());
        let response = self
            .client
            .post(&url)
            .query(&[("access_token", credentials.access_token.as_str())])
            .json(&payload)
            .send()
            .await
            .context("graph api request failed")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
            bail!("graph api responded {status}: {snippet}");
        }
        let parsed: EventsResponse =
            serde_json::from_str(&body).context("graph api returned an unreadable body")?;
        if parsed.events_received == 0 {
            bail!("graph api accepted no events");
        }
        debug!(
            event_id = %event.event_id,
            fbtrace_id = parsed.fbtrace_id.as_deref().unwrap_or(""),
            "conversion event accepted"
        );
        Ok(event.event_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use reclaim_core::{cart::ConversionEventType, event::LineItem};

    use super::*;

    fn credentials() -> ConversionCredentials {
        ConversionCredentials {
            pixel_id: "px_123".to_string(),
            access_token: "secret-token".to_string(),
            expires_at: None,
            test_event_code: None,
        }
    }

    fn event() -> ConversionEvent {
        ConversionEvent {
            event_type: ConversionEventType::Purchase,
            event_id: "evt-1".to_string(),
            event_time: Utc
                .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
                .single()
                .expect("valid"),
            value: 90.0,
            currency: "EUR".to_string(),
            line_items: vec![LineItem {
                title: "Linen shirt".to_string(),
                quantity: 2,
                unit_price: 45.0,
            }],
            customer_email: Some(" Jo@Example.com ".to_string()),
            customer_name: Some("Jo Doe".to_string()),
            event_source_url: Some("https://shop.example.com/checkouts/tok".to_string()),
        }
    }

    #[test]
    fn identifiers_are_normalized_before_hashing() {
        assert_eq!(
            hash_identifier(" Jo@Example.com "),
            hash_identifier("jo@example.com")
        );
        assert_eq!(hash_identifier("jo@example.com").len(), 64);
    }

    #[test]
    fn payload_never_carries_raw_customer_data() {
        let payload = event_payload(&event(), Some("TEST1"));
        let text = payload.to_string();
        assert!(!text.contains("Jo@Example.com"));
        assert!(!text.contains("Doe"));
        assert_eq!(payload["test_event_code"], "TEST1");
        assert_eq!(payload["data"][0]["event_name"], "Purchase");
        assert_eq!(payload["data"][0]["custom_data"]["num_items"], 2);
        assert_eq!(payload["data"][0]["event_time"], 1_772_366_400);
    }

    #[tokio::test]
    async fn successful_report_returns_the_event_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/px_123/events"))
            .and(query_param("access_token", "secret-token"))
            .and(body_partial_json(json!({
                "data": [{
                    "event_name": "Purchase",
                    "event_id": "evt-1",
                    "user_data": { "em": [hash_identifier("jo@example.com")] }
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events_received": 1,
                "messages": [],
                "fbtrace_id": "trace-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport =
            MetaCapiTransport::new(server.uri(), Duration::from_secs(5)).expect("client");
        let id = transport
            .report(&credentials(), &event())
            .await
            .expect("report");
        assert_eq!(id, "evt-1");
    }

    #[tokio::test]
    async fn error_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/px_123/events"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Invalid OAuth access token", "code": 190 }
            })))
            .mount(&server)
            .await;

        let transport =
            MetaCapiTransport::new(server.uri(), Duration::from_secs(5)).expect("client");
        let err = transport
            .report(&credentials(), &event())
            .await
            .expect_err("400");
        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("Invalid OAuth access token"));
        assert!(!message.contains("secret-token"));
    }

    #[tokio::test]
    async fn zero_events_received_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events_received": 0
            })))
            .mount(&server)
            .await;

        let transport =
            MetaCapiTransport::new(format!("{}/", server.uri()), Duration::from_secs(5))
                .expect("client");
        assert!(transport.report(&credentials(), &event()).await.is_err());
    }
}
