use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use reclaim_core::{
    cart::{AbandonedCart, NewAbandonedCart},
    event::{CheckoutEvent, EventDefect},
};

use super::{DetectionSummary, Engine};

enum Promotion {
    Promoted(AbandonedCart),
    Dropped(EventDefect),
    AlreadyHandled,
}

impl Engine {
    /// Promote checkout events older than the abandonment threshold into
    /// `abandoned` carts.
    ///
    /// Order events are applied first so a checkout completed inside the
    /// threshold is closed out instead of being promoted.
    pub async fn run_detection(&self, now: DateTime<Utc>) -> anyhow::Result<DetectionSummary> {
        let mut summary = DetectionSummary::default();
        let batch = self.settings.detection_batch_size;

        for order in self.repo.list_unprocessed_order_events(batch).await? {
            match self.handle_order_event(&order, now).await {
                Ok(recovered) => {
                    if recovered {
                        summary.recovered += 1;
                    }
                }
                Err(e) => {
                    warn!(event_id = %order.id, user_id = %order.user_id, error = %e, "order event failed");
                    summary.errors += 1;
                }
            }
        }

        let cutoff = now - self.settings.abandon_threshold;
        for event in self
            .repo
            .list_unprocessed_checkout_events(cutoff, batch)
            .await?
        {
            summary.processed += 1;
            match self.promote(&event).await {
                Ok(Promotion::Promoted(cart)) => {
                    info!(
                        event_id = %event.id,
                        cart_id = %cart.id,
                        user_id = %cart.user_id,
                        "checkout promoted to abandoned cart"
                    );
                    summary.promoted += 1;
                }
                Ok(Promotion::Dropped(defect)) => {
                    warn!(event_id = %event.id, defect = defect.as_str(), "checkout event dropped");
                    summary.dropped += 1;
                }
                Ok(Promotion::AlreadyHandled) => {}
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "checkout event promotion failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            promoted = summary.promoted,
            dropped = summary.dropped,
            recovered = summary.recovered,
            errors = summary.errors,
            "detection pass finished"
        );
        Ok(summary)
    }

    async fn promote(&self, event: &CheckoutEvent) -> anyhow::Result<Promotion> {
        if let Some(defect) = event.defect() {
            self.repo.mark_event_processed(&event.id).await?;
            return Ok(Promotion::Dropped(defect));
        }
        if self.repo.has_action_for_event(&event.id).await? {
            self.repo.mark_event_processed(&event.id).await?;
            return Ok(Promotion::AlreadyHandled);
        }

        let cart = self
            .repo
            .upsert_abandoned_cart(NewAbandonedCart {
                platform_cart_id: event.platform_cart_id.clone(),
                user_id: event.user_id.clone(),
                integration_id: event.integration_id.clone(),
                customer_email: event.customer_email.clone(),
                customer_name: event.customer_name.clone(),
                total_value: event.cart_value,
                currency: event.currency.clone(),
                cart_items: event.line_items.clone(),
                checkout_url: event.checkout_url.clone(),
                abandoned_at: event.created_at,
                source_event_id: event.id.clone(),
            })
            .await?;
        self.repo.mark_event_processed(&event.id).await?;
        Ok(Promotion::Promoted(cart))
    }

    /// Apply one order event and mark it processed. Returns whether a cart
    /// moved to `recovered`.
    async fn handle_order_event(
        &self,
        order: &CheckoutEvent,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let recovered = match self.apply_order_event(order, now).await {
            Ok(outcome) => outcome.is_some(),
            Err(super::EngineError::Core(e)) => {
                warn!(event_id = %order.id, error = %e, "order event did not apply");
                false
            }
            Err(super::EngineError::Repository(e)) => return Err(e),
        };
        let closed = self
            .repo
            .mark_cart_events_processed(&order.user_id, &order.platform_cart_id)
            .await?;
        if closed > 0 {
            info!(
                event_id = %order.id,
                platform_cart_id = %order.platform_cart_id,
                closed,
                "checkout completed before abandonment"
            );
        }
        self.repo.mark_event_processed(&order.id).await?;
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use reclaim_core::{cart::CartStatus, event::CheckoutEventType};

    use super::super::testkit::{checkout_event, harness, t0};

    #[tokio::test]
    async fn young_events_wait_for_the_threshold() {
        let h = harness();
        h.db
            .insert_checkout_event(&checkout_event("user_1", "tok_1", t0()))
            .await
            .expect("insert");

        let early = h
            .engine
            .run_detection(t0() + Duration::minutes(10))
            .await
            .expect("pass");
        assert_eq!(early.processed, 0);

        let later = h
            .engine
            .run_detection(t0() + Duration::minutes(16))
            .await
            .expect("pass");
        assert_eq!(later.promoted, 1);
    }

    #[tokio::test]
    async fn detection_is_idempotent_per_platform_cart() {
        let h = harness();
        let first = checkout_event("user_1", "tok_1", t0());
        let mut update = checkout_event("user_1", "tok_1", t0() + Duration::minutes(5));
        update.event_type = CheckoutEventType::CheckoutUpdated;
        update.cart_value = 135.0;
        for event in [&first, &update] {
            h.db.insert_checkout_event(event).await.expect("insert");
        }

        let now = t0() + Duration::hours(1);
        let pass = h.engine.run_detection(now).await.expect("first pass");
        assert_eq!(pass.processed, 2);
        let again = h.engine.run_detection(now).await.expect("second pass");
        assert_eq!(again.processed, 0);

        let conn = h.db.conn_for_test().await;
        let (count, value): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(total_value) FROM abandoned_carts WHERE platform_cart_id = 'tok_1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("count");
        assert_eq!(count, 1);
        assert_eq!(value, 135.0);
    }

    #[tokio::test]
    async fn abandoned_at_is_the_event_time() {
        let h = harness();
        let event = checkout_event("user_1", "tok_1", t0());
        h.db.insert_checkout_event(&event).await.expect("insert");
        h.engine
            .run_detection(t0() + Duration::hours(3))
            .await
            .expect("pass");

        let cart = h
            .db
            .find_cart_by_platform_id("user_1", "tok_1")
            .await
            .expect("find")
            .expect("cart");
        assert_eq!(cart.abandoned_at, t0());
        assert_eq!(cart.recovery_emails_sent, 0);
        assert_eq!(cart.source_event_id.as_deref(), Some(event.id.as_str()));
    }

    #[tokio::test]
    async fn ineligible_events_are_dropped_for_good() {
        let h = harness();
        let mut no_email = checkout_event("user_1", "tok_a", t0());
        no_email.customer_email = None;
        let mut no_url = checkout_event("user_1", "tok_b", t0());
        no_url.checkout_url = None;
        let mut empty = checkout_event("user_1", "tok_c", t0());
        empty.line_items.clear();
        for event in [&no_email, &no_url, &empty] {
            h.db.insert_checkout_event(event).await.expect("insert");
        }

        let pass = h
            .engine
            .run_detection(t0() + Duration::hours(1))
            .await
            .expect("pass");
        assert_eq!(pass.dropped, 3);
        assert_eq!(pass.promoted, 0);
        let stored = h
            .db
            .get_checkout_event(&no_email.id)
            .await
            .expect("get")
            .expect("event");
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn order_inside_threshold_closes_the_checkout() {
        let h = harness();
        let checkout = checkout_event("user_1", "tok_1", t0());
        let mut order = checkout_event("user_1", "tok_1", t0() + Duration::minutes(5));
        order.event_type = CheckoutEventType::OrderCreated;
        for event in [&checkout, &order] {
            h.db.insert_checkout_event(event).await.expect("insert");
        }

        let pass = h
            .engine
            .run_detection(t0() + Duration::minutes(30))
            .await
            .expect("pass");
        assert_eq!(pass.promoted, 0);
        assert_eq!(pass.recovered, 0);
        assert!(h
            .db
            .find_cart_by_platform_id("user_1", "tok_1")
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn order_after_promotion_recovers_the_cart() {
        let h = harness();
        h.db
            .insert_checkout_event(&checkout_event("user_1", "tok_1", t0()))
            .await
            .expect("insert");
        h.engine
            .run_detection(t0() + Duration::hours(1))
            .await
            .expect("detect");

        let mut order = checkout_event("user_1", "tok_1", t0() + Duration::hours(2));
        order.event_type = CheckoutEventType::OrderCreated;
        order.cart_value = 88.5;
        h.db.insert_checkout_event(&order).await.expect("insert order");

        let pass = h
            .engine
            .run_detection(t0() + Duration::hours(2))
            .await
            .expect("pass");
        assert_eq!(pass.recovered, 1);
        let cart = h
            .db
            .find_cart_by_platform_id("user_1", "tok_1")
            .await
            .expect("find")
            .expect("cart");
        assert_eq!(cart.status, CartStatus::Recovered);
        assert_eq!(cart.recovered_value, Some(88.5));
    }
}
