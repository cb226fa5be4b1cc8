//! Terminal signals: order completion, explicit expiry, and email
//! engagement.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use reclaim_core::{
    cart::{AbandonedCart, CartStatus, EngagementKind, RecoveryAction, RecoveryActionStatus},
    error::CoreError,
    event::{CheckoutEvent, CheckoutEventType},
};

use super::{Engine, EngineError};

impl Engine {
    /// `abandoned -> recovered`.
    ///
    /// A cart that is already `recovered` is returned unchanged, so the first
    /// call's `recovered_at` and value stand. An `expired` cart is rejected.
    pub async fn mark_recovered(
        &self,
        cart_id: &str,
        recovered_value: f64,
        now: DateTime<Utc>,
    ) -> Result<AbandonedCart, EngineError> {
        self.transition_recovered(cart_id, recovered_value, now)
            .await
            .map(|(cart, _)| cart)
    }

    /// Returns the stored cart and whether this call made the transition.
    async fn transition_recovered(
        &self,
        cart_id: &str,
        recovered_value: f64,
        now: DateTime<Utc>,
    ) -> Result<(AbandonedCart, bool), EngineError> {
        let cart = self.load_cart(cart_id).await?;
        match cart.status {
            CartStatus::Recovered => return Ok((cart, false)),
            CartStatus::Expired => {
                return Err(CoreError::InvalidTransition {
                    cart_id: cart_id.to_string(),
                    from: CartStatus::Expired.as_str(),
                    to: CartStatus::Recovered.as_str(),
                }
                .into())
            }
            CartStatus::Abandoned => {}
        }

        let changed = self
            .repo
            .mark_cart_recovered(cart_id, recovered_value, now)
            .await?;
        if changed {
            info!(
                cart_id = %cart_id,
                user_id = %cart.user_id,
                recovered_value,
                emails_sent = cart.recovery_emails_sent,
                "cart recovered"
            );
            if let Err(e) = self
                .repo
                .mark_latest_action_converted(cart_id, recovered_value, now)
                .await
            {
                warn!(cart_id = %cart_id, error = %e, "could not attribute recovery to an email");
            }
        }

        let stored = self.load_cart(cart_id).await?;
        if stored.status == CartStatus::Expired {
            return Err(CoreError::InvalidTransition {
                cart_id: cart_id.to_string(),
                from: CartStatus::Expired.as_str(),
                to: CartStatus::Recovered.as_str(),
            }
            .into());
        }
        Ok((stored, changed))
    }

    /// `abandoned -> expired`. Already `expired` is a no-op; `recovered` is
    /// rejected.
    pub async fn mark_expired(
        &self,
        cart_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AbandonedCart, EngineError> {
        let cart = self.load_cart(cart_id).await?;
        match cart.status {
            CartStatus::Expired => return Ok(cart),
            CartStatus::Recovered => {
                return Err(CoreError::InvalidTransition {
                    cart_id: cart_id.to_string(),
                    from: CartStatus::Recovered.as_str(),
                    to: CartStatus::Expired.as_str(),
                }
                .into())
            }
            CartStatus::Abandoned => {}
        }
        if self.repo.mark_cart_expired(cart_id, now).await? {
            info!(cart_id = %cart_id, user_id = %cart.user_id, "cart expired");
        }
        let stored = self.load_cart(cart_id).await?;
        if stored.status == CartStatus::Recovered {
            return Err(CoreError::InvalidTransition {
                cart_id: cart_id.to_string(),
                from: CartStatus::Recovered.as_str(),
                to: CartStatus::Expired.as_str(),
            }
            .into());
        }
        Ok(stored)
    }

    /// Match an `order_created` event to an open cart and recover it with the
    /// order value. Returns the cart when this call recovered it.
    pub async fn apply_order_event(
        &self,
        order: &CheckoutEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<AbandonedCart>, EngineError> {
        if order.event_type != CheckoutEventType::OrderCreated {
            return Err(CoreError::Validation(format!(
                "event {} is {}, not an order",
                order.id,
                order.event_type.as_str()
            ))
            .into());
        }
        let Some(cart) = self
            .repo
            .find_open_cart_for_order(
                &order.user_id,
                &order.platform_cart_id,
                order.customer_email.as_deref(),
            )
            .await?
        else {
            return Ok(None);
        };
        if cart.status != CartStatus::Abandoned {
            return Ok(None);
        }
        let (stored, changed) = self
            .transition_recovered(&cart.id, order.cart_value, now)
            .await?;
        Ok(changed.then_some(stored))
    }

    /// Record an open or click on a delivered recovery email.
    pub async fn record_engagement(
        &self,
        action_id: &str,
        kind: EngagementKind,
        now: DateTime<Utc>,
    ) -> Result<RecoveryAction, EngineError> {
        let action = self
            .repo
            .get_action(action_id)
            .await?
            .ok_or_else(|| CoreError::action_not_found(action_id))?;
        if action.status != RecoveryActionStatus::Sent {
            return Err(CoreError::Validation(format!(
                "recovery action {action_id} was not delivered"
            ))
            .into());
        }
        if self.repo.record_engagement(action_id, kind, now).await? {
            info!(action_id = %action_id, cart_id = %action.cart_id, kind = kind.as_str(), "engagement recorded");
        }
        Ok(self
            .repo
            .get_action(action_id)
            .await?
            .ok_or_else(|| CoreError::action_not_found(action_id))?)
    }

    async fn load_cart(&self, cart_id: &str) -> Result<AbandonedCart, EngineError> {
        Ok(self
            .repo
            .get_cart(cart_id)
            .await?
            .ok_or_else(|| CoreError::cart_not_found(cart_id))?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use reclaim_core::{
        cart::{ActionOutcome, CartStatus, EngagementKind, NewRecoveryAction},
        error::CoreError,
        event::CheckoutEventType,
    };

    use super::super::{
        testkit::{abandoned_cart, checkout_event, harness, t0},
        EngineError,
    };

    #[tokio::test]
    async fn mark_recovered_twice_keeps_the_first_values() {
        let h = harness();
        let cart = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_1", t0()))
            .await
            .expect("cart");

        let first_at = t0() + Duration::hours(2);
        let first = h
            .engine
            .mark_recovered(&cart.id, 90.0, first_at)
            .await
            .expect("recover");
        assert_eq!(first.status, CartStatus::Recovered);

        let second = h
            .engine
            .mark_recovered(&cart.id, 10.0, t0() + Duration::hours(5))
            .await
            .expect("no-op");
        assert_eq!(second.recovered_at, Some(first_at));
        assert_eq!(second.recovered_value, Some(90.0));
        assert_eq!(second.recovery_emails_sent, cart.recovery_emails_sent);
    }

    #[tokio::test]
    async fn unknown_cart_is_not_found() {
        let h = harness();
        let err = h
            .engine
            .mark_recovered("cart_missing", 1.0, t0())
            .await
            .expect_err("missing");
        assert!(matches!(
            err,
            EngineError::Core(CoreError::NotFound { entity: "cart", .. })
        ));
        assert!(h.engine.mark_expired("cart_missing", t0()).await.is_err());
    }

    #[tokio::test]
    async fn expiry_and_recovery_exclude_each_other() {
        let h = harness();
        let a = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_a", t0()))
            .await
            .expect("a");
        let b = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_b", t0()))
            .await
            .expect("b");

        let expired = h.engine.mark_expired(&a.id, t0()).await.expect("expire");
        assert_eq!(expired.status, CartStatus::Expired);
        h.engine.mark_expired(&a.id, t0()).await.expect("expire again");
        assert!(matches!(
            h.engine.mark_recovered(&a.id, 5.0, t0()).await,
            Err(EngineError::Core(CoreError::InvalidTransition { .. }))
        ));

        h.engine.mark_recovered(&b.id, 5.0, t0()).await.expect("recover");
        assert!(matches!(
            h.engine.mark_expired(&b.id, t0()).await,
            Err(EngineError::Core(CoreError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn order_matches_by_email_when_token_differs() {
        let h = harness();
        let cart = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_1", t0()))
            .await
            .expect("cart");
        let mut order = checkout_event("user_1", "order:991", t0() + Duration::hours(3));
        order.event_type = CheckoutEventType::OrderCreated;
        order.cart_value = 70.0;

        let recovered = h
            .engine
            .apply_order_event(&order, t0() + Duration::hours(3))
            .await
            .expect("apply")
            .expect("matched");
        assert_eq!(recovered.id, cart.id);
        assert_eq!(recovered.recovered_value, Some(70.0));

        let replay = h
            .engine
            .apply_order_event(&order, t0() + Duration::hours(4))
            .await
            .expect("replay");
        assert!(replay.is_none());
    }

    #[tokio::test]
    async fn order_for_an_expired_checkout_recovers_the_open_cart() {
        let h = harness();
        let stale = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_stale", t0()))
            .await
            .expect("stale");
        let open = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_open", t0() + Duration::hours(1)))
            .await
            .expect("open");
        h.engine.mark_expired(&stale.id, t0()).await.expect("expire");

        let mut order = checkout_event("user_1", "tok_stale", t0() + Duration::hours(3));
        order.event_type = CheckoutEventType::OrderCreated;
        let recovered = h
            .engine
            .apply_order_event(&order, t0() + Duration::hours(3))
            .await
            .expect("apply")
            .expect("matched by email");
        assert_eq!(recovered.id, open.id);
    }

    #[tokio::test]
    async fn redelivered_order_does_not_recover_a_second_cart() {
        let h = harness();
        let paid = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_paid", t0()))
            .await
            .expect("paid");
        let other = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_other", t0() + Duration::hours(1)))
            .await
            .expect("other");

        let mut order = checkout_event("user_1", "tok_paid", t0() + Duration::hours(3));
        order.event_type = CheckoutEventType::OrderCreated;
        let first = h
            .engine
            .apply_order_event(&order, t0() + Duration::hours(3))
            .await
            .expect("apply")
            .expect("matched by token");
        assert_eq!(first.id, paid.id);

        let replay = h
            .engine
            .apply_order_event(&order, t0() + Duration::hours(4))
            .await
            .expect("replay");
        assert!(replay.is_none());
        let other = h.db.get_cart(&other.id).await.expect("get").expect("cart");
        assert_eq!(other.status, CartStatus::Abandoned);
    }

    #[tokio::test]
    async fn checkout_events_are_not_orders() {
        let h = harness();
        let event = checkout_event("user_1", "tok_1", t0());
        assert!(matches!(
            h.engine.apply_order_event(&event, t0()).await,
            Err(EngineError::Core(CoreError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn engagement_and_conversion_attribution() {
        let h = harness();
        let cart = h
            .db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_1", t0()))
            .await
            .expect("cart");
        let action = h
            .db
            .claim_recovery_send(NewRecoveryAction {
                cart_id: cart.id.clone(),
                checkout_event_id: cart.source_event_id.clone(),
                user_id: "user_1".to_string(),
                email_number: 1,
                recipient: "jo@example.com".to_string(),
                subject: None,
                created_at: t0(),
            })
            .await
            .expect("claim")
            .expect("granted");

        assert!(matches!(
            h.engine
                .record_engagement(&action.id, EngagementKind::Opened, t0())
                .await,
            Err(EngineError::Core(CoreError::Validation(_)))
        ));

        h.db.complete_recovery_action(
            &action.id,
            ActionOutcome::Sent {
                external_message_id: None,
                sent_at: t0() + Duration::hours(1),
            },
        )
        .await
        .expect("sent");

        let opened_at = t0() + Duration::hours(2);
        let opened = h
            .engine
            .record_engagement(&action.id, EngagementKind::Opened, opened_at)
            .await
            .expect("open");
        assert!(opened.opened);
        let again = h
            .engine
            .record_engagement(&action.id, EngagementKind::Opened, opened_at + Duration::hours(1))
            .await
            .expect("open again");
        assert_eq!(again.opened_at, Some(opened_at));

        h.engine
            .mark_recovered(&cart.id, 90.0, t0() + Duration::hours(6))
            .await
            .expect("recover");
        let converted = h
            .db
            .get_action(&action.id)
            .await
            .expect("get")
            .expect("action");
        assert!(converted.converted);
        assert_eq!(converted.conversion_value, Some(90.0));

        assert!(matches!(
            h.engine
                .record_engagement("rca_missing", EngagementKind::Clicked, t0())
                .await,
            Err(EngineError::Core(CoreError::NotFound { entity: "recovery action", .. }))
        ));
    }
}
