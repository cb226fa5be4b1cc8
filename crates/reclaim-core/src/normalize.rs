//! Strict parse of Shopify checkout and order webhook payloads into the
//! canonical [`CheckoutEvent`].
//!
//! Malformed payloads (wrong types, unparseable prices or timestamps, missing
//! checkout token) are rejected here and never stored. Payloads that parse but
//! lack data the engine needs (no email, no items) are accepted; the detector
//! drops them later so they stay on the audit trail.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::event::{CheckoutEvent, CheckoutEventType, LineItem};

/// Domain reserved for "no email captured" sentinels.
const PLACEHOLDER_DOMAIN: &str = "placeholder.invalid";
pub const DEFAULT_PLACEHOLDER_EMAIL: &str = "noemail@placeholder.invalid";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unsupported topic: {0}")]
    UnsupportedTopic(String),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// Shape check shared by ingest and delivery: a non-empty local part and a
/// dotted domain.
pub fn is_valid_email(raw: &str) -> bool {
    let Some((local, domain)) = raw.trim().split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
}

/// Decides which captured addresses count as "no email".
#[derive(Debug, Clone)]
pub struct EmailPolicy {
    placeholders: Vec<String>,
}

impl Default for EmailPolicy {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl EmailPolicy {
    pub fn new(extra_placeholders: Vec<String>) -> Self {
        let mut placeholders: Vec<String> = extra_placeholders
            .into_iter()
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        placeholders.push(DEFAULT_PLACEHOLDER_EMAIL.to_string());
        Self { placeholders }
    }

    /// Normalise a raw address. Empty, malformed and placeholder addresses
    /// become `None`.
    pub fn clean(&self, raw: Option<&str>) -> Option<String> {
        let email = raw?.trim().to_ascii_lowercase();
        if !is_valid_email(&email) {
            return None;
        }
        let domain = email.split_once('@').map_or("", |(_, d)| d);
        if domain == PLACEHOLDER_DOMAIN || self.placeholders.iter().any(|p| *p == email) {
            return None;
        }
        Some(email)
    }
}

/// Shopify ids arrive as numbers from the REST webhooks and as strings
/// from some app proxies.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShopifyId {
    Num(u64),
    Str(String),
}

impl ShopifyId {
    fn into_string(self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShopifyCustomer {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShopifyLineItem {
    title: String,
    quantity: u32,
    price: String,
}

#[derive(Debug, Deserialize)]
struct ShopifyCheckout {
    token: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    customer: Option<ShopifyCustomer>,
    #[serde(default)]
    line_items: Vec<ShopifyLineItem>,
    total_price: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    presentment_currency: Option<String>,
    #[serde(default)]
    abandoned_checkout_url: Option<String>,
    created_at: DateTime<FixedOffset>,
    #[serde(default)]
    updated_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
struct ShopifyOrder {
    id: ShopifyId,
    #[serde(default)]
    checkout_token: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    customer: Option<ShopifyCustomer>,
    #[serde(default)]
    line_items: Vec<ShopifyLineItem>,
    total_price: String,
    #[serde(default)]
    currency: Option<String>,
    created_at: DateTime<FixedOffset>,
}

fn parse_price(field: &'static str, raw: &str) -> Result<f64, NormalizeError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(field, format!("not a decimal amount: {raw:?}")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, "must be a non-negative amount"));
    }
    Ok(value)
}

fn convert_line_items(items: Vec<ShopifyLineItem>) -> Result<Vec<LineItem>, NormalizeError> {
    items
        .into_iter()
        .map(|item| {
            Ok(LineItem {
                unit_price: parse_price("line_items.price", &item.price)?,
                title: item.title,
                quantity: item.quantity,
            })
        })
        .collect()
}

fn customer_name(customer: Option<&ShopifyCustomer>) -> Option<String> {
    let customer = customer?;
    let first = customer.first_name.as_deref().unwrap_or("").trim();
    let last = customer.last_name.as_deref().unwrap_or("").trim();
    let full = format!("{first} {last}").trim().to_string();
    if full.is_empty() {
        None
    } else {
        Some(full)
    }
}

fn currency_code(raw: Option<String>) -> Result<String, NormalizeError> {
    let code = raw
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| invalid("currency", "missing"))?;
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid("currency", format!("not an ISO 4217 code: {code}")));
    }
    Ok(code)
}

fn checkout_url(raw: Option<String>) -> Result<Option<String>, NormalizeError> {
    let Some(raw) = raw.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let parsed = Url::parse(&raw).map_err(|_| invalid("abandoned_checkout_url", "not a url"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(
            "abandoned_checkout_url",
            "must use http or https",
        ));
    }
    Ok(Some(raw))
}

/// Parse one webhook delivery.
///
/// `topic` is the Shopify webhook topic: `checkouts/create`,
/// `checkouts/update` or `orders/create`.
pub fn normalize_shopify(
    user_id: &str,
    integration_id: &str,
    topic: &str,
    payload: &Value,
    policy: &EmailPolicy,
) -> Result<CheckoutEvent, NormalizeError> {
    let event_type = match topic {
        "checkouts/create" => CheckoutEventType::CheckoutCreated,
        "checkouts/update" => CheckoutEventType::CheckoutUpdated,
        "orders/create" => CheckoutEventType::OrderCreated,
        other => return Err(NormalizeError::UnsupportedTopic(other.to_string())),
    };
    if user_id.trim().is_empty() {
        return Err(invalid("user_id", "must not be empty"));
    }
    if integration_id.trim().is_empty() {
        return Err(invalid("integration_id", "must not be empty"));
    }

    match event_type {
        CheckoutEventType::CheckoutCreated | CheckoutEventType::CheckoutUpdated => {
            let checkout = ShopifyCheckout::deserialize(payload)?;
            if checkout.token.trim().is_empty() {
                return Err(invalid("token", "must not be empty"));
            }
            let raw_email = checkout
                .email
                .as_deref()
                .or_else(|| checkout.customer.as_ref().and_then(|c| c.email.as_deref()));
            let customer_email = policy.clean(raw_email);
            // Abandonment age runs from the last customer activity.
            let created_at = match event_type {
                CheckoutEventType::CheckoutUpdated => {
                    checkout.updated_at.unwrap_or(checkout.created_at)
                }
                _ => checkout.created_at,
            };
            Ok(CheckoutEvent {
                id: uuid::Uuid::new_v4().to_string(),
                integration_id: integration_id.to_string(),
                user_id: user_id.to_string(),
                event_type,
                platform_cart_id: checkout.token,
                customer_email,
                customer_name: customer_name(checkout.customer.as_ref()),
                line_items: convert_line_items(checkout.line_items)?,
                cart_value: parse_price("total_price", &checkout.total_price)?,
                currency: currency_code(checkout.presentment_currency.or(checkout.currency))?,
                checkout_url: checkout_url(checkout.abandoned_checkout_url)?,
                created_at: created_at.with_timezone(&Utc),
                processed: false,
            })
        }
        CheckoutEventType::OrderCreated => {
            let order = ShopifyOrder::deserialize(payload)?;
            let order_id = order.id.into_string();
            let raw_email = order
                .email
                .as_deref()
                .or_else(|| order.customer.as_ref().and_then(|c| c.email.as_deref()));
            let platform_cart_id = order
                .checkout_token
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("order:{order_id}"));
            Ok(CheckoutEvent {
                id: uuid::Uuid::new_v4().to_string(),
                integration_id: integration_id.to_string(),
                user_id: user_id.to_string(),
                event_type,
                platform_cart_id,
                customer_email: policy.clean(raw_email),
                customer_name: customer_name(order.customer.as_ref()),
                line_items: convert_line_items(order.line_items)?,
                cart_value: parse_price("total_price", &order.total_price)?,
                currency: currency_code(order.currency)?,
                checkout_url: None,
                created_at: order.created_at.with_timezone(&Utc),
                processed: false,
            })
        }
    }
}
