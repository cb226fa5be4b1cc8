use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutEventType {
    CheckoutCreated,
    CheckoutUpdated,
    OrderCreated,
}

impl CheckoutEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutCreated => "checkout_created",
            Self::CheckoutUpdated => "checkout_updated",
            Self::OrderCreated => "order_created",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "checkout_created" => Ok(Self::CheckoutCreated),
            "checkout_updated" => Ok(Self::CheckoutUpdated),
            "order_created" => Ok(Self::OrderCreated),
            _ => Err(anyhow!("invalid checkout event type: {raw}")),
        }
    }

    /// Checkout events are the only ones that can be promoted into carts.
    pub fn is_checkout(&self) -> bool {
        matches!(self, Self::CheckoutCreated | Self::CheckoutUpdated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub title: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl LineItem {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

/// A canonical checkout or order event, as produced by the normalizer.
///
/// Immutable once stored apart from the `processed` flag. Rows are never
/// deleted so the table doubles as the ingestion audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutEvent {
    pub id: String,
    pub integration_id: String,
    pub user_id: String,
    pub event_type: CheckoutEventType,
    /// Upstream checkout token. Becomes `AbandonedCart.platform_cart_id`.
    pub platform_cart_id: String,
    /// `None` when the platform captured no usable address.
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub line_items: Vec<LineItem>,
    pub cart_value: f64,
    pub currency: String,
    pub checkout_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
}

/// Why a checkout event can never become an abandoned cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDefect {
    NotACheckout,
    MissingEmail,
    MissingCheckoutUrl,
    EmptyLineItems,
}

impl EventDefect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotACheckout => "not a checkout event",
            Self::MissingEmail => "missing customer email",
            Self::MissingCheckoutUrl => "missing checkout url",
            Self::EmptyLineItems => "empty line items",
        }
    }
}

impl CheckoutEvent {
    /// Returns the first permanent defect that rules this event out of
    /// promotion, or `None` when it is eligible (age aside).
    pub fn defect(&self) -> Option<EventDefect> {
        if !self.event_type.is_checkout() {
            return Some(EventDefect::NotACheckout);
        }
        if self.customer_email.as_deref().map_or(true, str::is_empty) {
            return Some(EventDefect::MissingEmail);
        }
        if self.checkout_url.as_deref().map_or(true, str::is_empty) {
            return Some(EventDefect::MissingCheckoutUrl);
        }
        if self.line_items.is_empty() {
            return Some(EventDefect::EmptyLineItems);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout() -> CheckoutEvent {
        CheckoutEvent {
            id: "evt_1".to_string(),
            integration_id: "int_1".to_string(),
            user_id: "user_1".to_string(),
            event_type: CheckoutEventType::CheckoutCreated,
            platform_cart_id: "tok_1".to_string(),
            customer_email: Some("jane@example.com".to_string()),
            customer_name: Some("Jane".to_string()),
            line_items: vec![LineItem {
                title: "Mug".to_string(),
                quantity: 2,
                unit_price: 12.5,
            }],
            cart_value: 25.0,
            currency: "USD".to_string(),
            checkout_url: Some("https://shop.example.com/checkouts/tok_1".to_string()),
            created_at: Utc::now(),
            processed: false,
        }
    }

    #[test]
    fn complete_checkout_has_no_defect() {
        assert_eq!(checkout().defect(), None);
    }

    #[test]
    fn order_events_are_never_promoted() {
        let mut event = checkout();
        event.event_type = CheckoutEventType::OrderCreated;
        assert_eq!(event.defect(), Some(EventDefect::NotACheckout));
    }

    #[test]
    fn missing_fields_are_reported_in_order() {
        let mut event = checkout();
        event.customer_email = None;
        event.line_items.clear();
        assert_eq!(event.defect(), Some(EventDefect::MissingEmail));

        let mut event = checkout();
        event.checkout_url = Some(String::new());
        assert_eq!(event.defect(), Some(EventDefect::MissingCheckoutUrl));

        let mut event = checkout();
        event.line_items.clear();
        assert_eq!(event.defect(), Some(EventDefect::EmptyLineItems));
    }

    #[test]
    fn event_type_round_trips_through_storage_names() {
        for ty in [
            CheckoutEventType::CheckoutCreated,
            CheckoutEventType::CheckoutUpdated,
            CheckoutEventType::OrderCreated,
        ] {
            assert_eq!(CheckoutEventType::parse(ty.as_str()).expect("parse"), ty);
        }
        assert!(CheckoutEventType::parse("refund_created").is_err());
    }

    #[test]
    fn line_item_subtotal_multiplies_quantity() {
        let item = LineItem {
            title: "Socks".to_string(),
            quantity: 3,
            unit_price: 4.0,
        };
        assert_eq!(item.subtotal(), 12.0);
    }
}
