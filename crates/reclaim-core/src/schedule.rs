//! Send-decision rules for recovery emails.
//!
//! The repository query already narrows candidates to carts that are old
//! enough and under the cap; [`evaluate_send`] is the authoritative check the
//! scheduler applies to each candidate before claiming a send.

use chrono::{DateTime, Utc};

use crate::{cart::AbandonedCart, settings::RecoverySettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// Cart is recovered or expired.
    Terminal,
    /// No usable customer address.
    NoRecipient,
    /// `max_emails` already sent.
    Capped,
    /// First email: cart is younger than `delay_hours`.
    NotDue { due_at: DateTime<Utc> },
    /// Follow-up email: `interval_hours` not yet elapsed since the last one.
    IntervalPending { due_at: DateTime<Utc> },
    /// Due, but the cart has no checkout link to send. Never retried.
    MissingCheckoutUrl,
    Due { email_number: u32 },
}

impl SendDecision {
    pub fn is_due(&self) -> bool {
        matches!(self, Self::Due { .. })
    }
}

pub fn evaluate_send(
    cart: &AbandonedCart,
    settings: &RecoverySettings,
    now: DateTime<Utc>,
) -> SendDecision {
    if cart.status.is_terminal() {
        return SendDecision::Terminal;
    }
    if cart
        .customer_email
        .as_deref()
        .map_or(true, |e| e.trim().is_empty())
    {
        return SendDecision::NoRecipient;
    }
    if cart.recovery_emails_sent >= settings.max_emails {
        return SendDecision::Capped;
    }
    let first_due = cart.abandoned_at + settings.delay();
    if now < first_due {
        return SendDecision::NotDue { due_at: first_due };
    }
    if let Some(last) = cart.last_recovery_email_at {
        let next_due = last + settings.interval();
        if now < next_due {
            return SendDecision::IntervalPending { due_at: next_due };
        }
    }
    if cart
        .checkout_url
        .as_deref()
        .map_or(true, |u| u.trim().is_empty())
    {
        return SendDecision::MissingCheckoutUrl;
    }
    SendDecision::Due {
        email_number: cart.next_email_number(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::cart::CartStatus;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn cart() -> AbandonedCart {
        AbandonedCart {
            id: "cart_1".to_string(),
            platform_cart_id: "tok_1".to_string(),
            user_id: "user_1".to_string(),
            integration_id: "int_1".to_string(),
            customer_email: Some("jane@example.com".to_string()),
            customer_name: None,
            total_value: 40.0,
            currency: "EUR".to_string(),
            cart_items: vec![],
            checkout_url: Some("https://shop.example.com/c/tok_1".to_string()),
            status: CartStatus::Abandoned,
            abandoned_at: t0(),
            recovery_emails_sent: 0,
            last_recovery_email_at: None,
            recovered_at: None,
            recovered_value: None,
            source_event_id: None,
            capi_add_to_cart_sent: false,
            capi_add_to_cart_event_id: None,
            capi_purchase_sent: false,
            capi_purchase_event_id: None,
            capi_error: None,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn settings() -> RecoverySettings {
        RecoverySettings {
            enabled: true,
            delay_hours: 1,
            interval_hours: 24,
            max_emails: 3,
            sender_email: Some("shop@example.com".to_string()),
            ..RecoverySettings::default()
        }
    }

    #[test]
    fn first_email_waits_for_delay() {
        let decision = evaluate_send(&cart(), &settings(), t0() + Duration::minutes(30));
        assert_eq!(
            decision,
            SendDecision::NotDue {
                due_at: t0() + Duration::hours(1)
            }
        );
        let decision = evaluate_send(&cart(), &settings(), t0() + Duration::minutes(61));
        assert_eq!(decision, SendDecision::Due { email_number: 1 });
    }

    #[test]
    fn follow_up_waits_for_interval() {
        let first_sent = t0() + Duration::minutes(61);
        let mut cart = cart();
        cart.recovery_emails_sent = 1;
        cart.last_recovery_email_at = Some(first_sent);

        let early = evaluate_send(&cart, &settings(), first_sent + Duration::hours(23));
        assert!(matches!(early, SendDecision::IntervalPending { .. }));

        let later = evaluate_send(&cart, &settings(), first_sent + Duration::hours(25));
        assert_eq!(later, SendDecision::Due { email_number: 2 });
    }

    #[test]
    fn capped_cart_is_never_due() {
        let mut cart = cart();
        cart.recovery_emails_sent = 3;
        let decision = evaluate_send(&cart, &settings(), t0() + Duration::days(365));
        assert_eq!(decision, SendDecision::Capped);
    }

    #[test]
    fn terminal_and_recipientless_carts_are_skipped() {
        let mut recovered = cart();
        recovered.status = CartStatus::Recovered;
        assert_eq!(
            evaluate_send(&recovered, &settings(), t0() + Duration::days(2)),
            SendDecision::Terminal
        );

        let mut anonymous = cart();
        anonymous.customer_email = None;
        assert_eq!(
            evaluate_send(&anonymous, &settings(), t0() + Duration::days(2)),
            SendDecision::NoRecipient
        );
    }

    #[test]
    fn missing_checkout_url_is_a_permanent_skip() {
        let mut cart = cart();
        cart.checkout_url = None;
        let decision = evaluate_send(&cart, &settings(), t0() + Duration::hours(2));
        assert_eq!(decision, SendDecision::MissingCheckoutUrl);
        assert!(!decision.is_due());
    }
}
