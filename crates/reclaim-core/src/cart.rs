use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::LineItem;

/// Recovery lifecycle of a cart. `Recovered` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    Abandoned,
    Recovered,
    Expired,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abandoned => "abandoned",
            Self::Recovered => "recovered",
            Self::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "abandoned" => Ok(Self::Abandoned),
            "recovered" => Ok(Self::Recovered),
            "expired" => Ok(Self::Expired),
            _ => Err(anyhow!("invalid cart status: {raw}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Abandoned)
    }
}

/// Conversion event types reported to the ads platform. Each one has its
/// own sent-flag on the cart and is reported at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionEventType {
    AddToCart,
    Purchase,
}

impl ConversionEventType {
    pub const ALL: [ConversionEventType; 2] = [Self::AddToCart, Self::Purchase];

    /// Event name as the ads platform expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddToCart => "AddToCart",
            Self::Purchase => "Purchase",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "AddToCart" | "add_to_cart" => Ok(Self::AddToCart),
            "Purchase" | "purchase" => Ok(Self::Purchase),
            _ => Err(anyhow!("invalid conversion event type: {raw}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonedCart {
    pub id: String,
    pub platform_cart_id: String,
    pub user_id: String,
    pub integration_id: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub total_value: f64,
    pub currency: String,
    pub cart_items: Vec<LineItem>,
    pub checkout_url: Option<String>,
    pub status: CartStatus,
    pub abandoned_at: DateTime<Utc>,
    pub recovery_emails_sent: u32,
    pub last_recovery_email_at: Option<DateTime<Utc>>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub recovered_value: Option<f64>,
    /// The checkout event most recently promoted into this row.
    pub source_event_id: Option<String>,
    pub capi_add_to_cart_sent: bool,
    pub capi_add_to_cart_event_id: Option<String>,
    pub capi_purchase_sent: bool,
    pub capi_purchase_event_id: Option<String>,
    /// Last conversion-reporting failure, cleared on the next success.
    pub capi_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AbandonedCart {
    pub fn conversion_sent(&self, event_type: ConversionEventType) -> bool {
        match event_type {
            ConversionEventType::AddToCart => self.capi_add_to_cart_sent,
            ConversionEventType::Purchase => self.capi_purchase_sent,
        }
    }

    pub fn conversion_event_id(&self, event_type: ConversionEventType) -> Option<&str> {
        match event_type {
            ConversionEventType::AddToCart => self.capi_add_to_cart_event_id.as_deref(),
            ConversionEventType::Purchase => self.capi_purchase_event_id.as_deref(),
        }
    }

    /// 1-based number of the next recovery email in this cart's sequence.
    pub fn next_email_number(&self) -> u32 {
        self.recovery_emails_sent + 1
    }
}

/// Input to the cart upsert. Keyed by `platform_cart_id`.
#[derive(Debug, Clone)]
pub struct NewAbandonedCart {
    pub platform_cart_id: String,
    pub user_id: String,
    pub integration_id: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub total_value: f64,
    pub currency: String,
    pub cart_items: Vec<LineItem>,
    pub checkout_url: Option<String>,
    pub abandoned_at: DateTime<Utc>,
    pub source_event_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionStatus {
    Pending,
    Sent,
    Failed,
}

impl RecoveryActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow!("invalid recovery action status: {raw}")),
        }
    }
}

/// Audit row for one recovery-email send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub id: String,
    pub cart_id: String,
    pub checkout_event_id: Option<String>,
    pub user_id: String,
    pub email_number: u32,
    pub recipient: String,
    pub subject: Option<String>,
    pub status: RecoveryActionStatus,
    pub error_message: Option<String>,
    pub external_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened: bool,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked: bool,
    pub clicked_at: Option<DateTime<Utc>>,
    pub converted: bool,
    pub converted_at: Option<DateTime<Utc>>,
    pub conversion_value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewRecoveryAction {
    pub cart_id: String,
    pub checkout_event_id: Option<String>,
    pub user_id: String,
    pub email_number: u32,
    pub recipient: String,
    pub subject: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Final outcome written onto a pending action after the mailer returns.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Sent {
        external_message_id: Option<String>,
        sent_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Opened,
    Clicked,
}

impl EngagementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Clicked => "clicked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_abandoned_is_non_terminal() {
        assert!(!CartStatus::Abandoned.is_terminal());
        assert!(CartStatus::Recovered.is_terminal());
        assert!(CartStatus::Expired.is_terminal());
    }

    #[test]
    fn conversion_type_accepts_platform_and_snake_names() {
        assert_eq!(
            ConversionEventType::parse("Purchase").expect("parse"),
            ConversionEventType::Purchase
        );
        assert_eq!(
            ConversionEventType::parse("add_to_cart").expect("parse"),
            ConversionEventType::AddToCart
        );
        assert!(ConversionEventType::parse("ViewContent").is_err());
    }

    #[test]
    fn statuses_parse_their_own_names() {
        for status in [
            RecoveryActionStatus::Pending,
            RecoveryActionStatus::Sent,
            RecoveryActionStatus::Failed,
        ] {
            assert_eq!(
                RecoveryActionStatus::parse(status.as_str()).expect("parse"),
                status
            );
        }
        assert!(CartStatus::parse("archived").is_err());
    }
}
