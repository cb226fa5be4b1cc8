use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use reclaim_core::{
    cart::{AbandonedCart, ConversionEventType},
    transport::{ConversionCredentials, ConversionEvent},
};

use super::{Engine, ReportingSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportOutcome {
    Reported,
    Failed,
    Skipped,
}

/// Build the canonical event for one report attempt. The event id is fresh
/// for every attempt.
fn conversion_event(
    cart: &AbandonedCart,
    event_type: ConversionEventType,
    now: DateTime<Utc>,
) -> ConversionEvent {
    let (event_time, value) = match event_type {
        ConversionEventType::AddToCart => (cart.abandoned_at, cart.total_value),
        ConversionEventType::Purchase => (
            cart.recovered_at.unwrap_or(now),
            cart.recovered_value.unwrap_or(cart.total_value),
        ),
    };
    ConversionEvent {
        event_type,
        event_id: uuid::Uuid::new_v4().to_string(),
        event_time,
        value,
        currency: cart.currency.clone(),
        line_items: cart.cart_items.clone(),
        customer_email: cart.customer_email.clone(),
        customer_name: cart.customer_name.clone(),
        event_source_url: cart.checkout_url.clone(),
    }
}

/// Round-robin across users so one user's backlog cannot crowd out the rest.
fn interleave<T>(per_user: Vec<Vec<T>>) -> Vec<T> {
    let mut queues: Vec<_> = per_user.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::new();
    loop {
        let before = out.len();
        out.extend(queues.iter_mut().filter_map(Iterator::next));
        if out.len() == before {
            return out;
        }
    }
}

/// Split `limit` into `(add_to_cart, purchase)` slots. Each type is
/// guaranteed half of the budget and an unused half flows to the other.
fn split_budget(limit: usize, add_to_cart: usize, purchase: usize) -> (usize, usize) {
    let purchase_slots = purchase.min(limit.div_ceil(2).max(limit.saturating_sub(add_to_cart)));
    let add_slots = add_to_cart.min(limit - purchase_slots);
    (add_slots, purchase_slots)
}

impl Engine {
    /// Report `AddToCart` and `Purchase` for recovered carts, at most `limit`
    /// reports per pass and at most `reporter_concurrency` in flight.
    ///
    /// Users without usable credentials are left out before the batch is
    /// built, so their carts never take a slot.
    pub async fn run_conversion_reporting(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ReportingSummary> {
        let limit = limit.max(1);
        let mut summary = ReportingSummary::default();

        let mut users: Vec<(String, ConversionCredentials)> = Vec::new();
        for user_id in self.repo.list_pending_conversion_users().await? {
            match self.usable_credentials(&user_id, now).await {
                Some(creds) => users.push((user_id, creds)),
                None => summary.users_skipped += 1,
            }
        }

        let mut add_to_cart = self
            .pending_queue(&users, ConversionEventType::AddToCart, limit)
            .await?;
        let mut purchase = self
            .pending_queue(&users, ConversionEventType::Purchase, limit)
            .await?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let (add_slots, purchase_slots) = split_budget(limit, add_to_cart.len(), purchase.len());
        purchase.truncate(purchase_slots);
        add_to_cart.truncate(add_slots);

        let work: Vec<_> = purchase.into_iter().chain(add_to_cart).collect();
        summary.processed = work.len();
        if work.is_empty() {
            return Ok(summary);
        }

        let users = &users;
        let outcomes: Vec<ReportOutcome> = stream::iter(work)
            .map(move |(idx, cart, event_type)| async move {
                let creds = &users[idx].1;
                self.report_one(&cart, event_type, creds, now).await
            })
            .buffer_unordered(self.settings.reporter_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                ReportOutcome::Reported => summary.successful += 1,
                ReportOutcome::Failed => summary.failed += 1,
                ReportOutcome::Skipped => summary.skipped += 1,
            }
        }
        info!(
            processed = summary.processed,
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            users_skipped = summary.users_skipped,
            "conversion reporting pass finished"
        );
        Ok(summary)
    }

    /// Pending reports of one type, at most `limit` per user, interleaved
    /// across users in the order given.
    async fn pending_queue(
        &self,
        users: &[(String, ConversionCredentials)],
        event_type: ConversionEventType,
        limit: i64,
    ) -> anyhow::Result<Vec<(usize, AbandonedCart, ConversionEventType)>> {
        let mut per_user = Vec::with_capacity(users.len());
        for (idx, (user_id, _)) in users.iter().enumerate() {
            let carts = self
                .repo
                .list_pending_conversions(user_id, event_type, limit)
                .await?;
            per_user.push(
                carts
                    .into_iter()
                    .map(|cart| (idx, cart, event_type))
                    .collect::<Vec<_>>(),
            );
        }
        Ok(interleave(per_user))
    }

    async fn usable_credentials(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Option<ConversionCredentials> {
        match self.credentials.credentials_for(user_id, now).await {
            Ok(creds) if creds.is_expired(now) => {
                warn!(user_id = %user_id, "ads credentials expired, user skipped");
                None
            }
            Ok(creds) => Some(creds),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "ads credentials unavailable, user skipped");
                None
            }
        }
    }

    async fn report_one(
        &self,
        cart: &AbandonedCart,
        event_type: ConversionEventType,
        credentials: &ConversionCredentials,
        now: DateTime<Utc>,
    ) -> ReportOutcome {
        let claim = uuid::Uuid::new_v4().to_string();
        match self
            .repo
            .claim_conversion_report(&cart.id, event_type, &claim)
            .await
        {
            Ok(true) => {}
            Ok(false) => return ReportOutcome::Skipped,
            Err(e) => {
                warn!(cart_id = %cart.id, event = event_type.as_str(), error = %e, "conversion claim failed");
                return ReportOutcome::Failed;
            }
        }

        let event = conversion_event(cart, event_type, now);
        let timeout = self.settings.external_timeout;
        let result =
            match tokio::time::timeout(timeout, self.transport.report(credentials, &event)).await {
                Ok(Ok(external_id)) => Ok(external_id),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "ads transport timed out after {}s",
                    timeout.as_secs()
                )),
            };

        match result {
            Ok(external_id) => match self
                .repo
                .complete_conversion_report(&cart.id, event_type, &claim, &external_id)
                .await
            {
                Ok(true) => {
                    info!(
                        cart_id = %cart.id,
                        user_id = %cart.user_id,
                        event = event_type.as_str(),
                        external_id = %external_id,
                        "conversion reported"
                    );
                    ReportOutcome::Reported
                }
                Ok(false) => {
                    warn!(cart_id = %cart.id, event = event_type.as_str(), "conversion claim lost before completion");
                    ReportOutcome::Skipped
                }
                Err(e) => {
                    warn!(cart_id = %cart.id, event = event_type.as_str(), error = %e, "conversion reported but not recorded");
                    ReportOutcome::Failed
                }
            },
            Err(error) => {
                warn!(cart_id = %cart.id, event = event_type.as_str(), error = %error, "conversion report failed");
                if let Err(e) = self
                    .repo
                    .release_conversion_claim(&cart.id, event_type, &claim, &error)
                    .await
                {
                    warn!(cart_id = %cart.id, error = %e, "conversion claim release failed");
                }
                ReportOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::{DateTime, Duration, Utc};

    use reclaim_core::cart::{AbandonedCart, ConversionEventType};

    use super::super::testkit::{abandoned_cart, harness, harness_with, t0, Harness, StaticCredentials};
    use super::split_budget;

    async fn recovered_cart(h: &Harness, user_id: &str, token: &str) -> AbandonedCart {
        recovered_cart_at(h, user_id, token, t0() + Duration::hours(5)).await
    }

    async fn recovered_cart_at(
        h: &Harness,
        user_id: &str,
        token: &str,
        recovered_at: DateTime<Utc>,
    ) -> AbandonedCart {
        let cart = h
            .db
            .upsert_abandoned_cart(abandoned_cart(user_id, token, t0()))
            .await
            .expect("cart");
        h.engine
            .mark_recovered(&cart.id, 120.0, recovered_at)
            .await
            .expect("recover")
    }

    #[tokio::test]
    async fn abandoned_carts_are_never_reported() {
        let h = harness();
        h.db
            .upsert_abandoned_cart(abandoned_cart("user_1", "tok_1", t0()))
            .await
            .expect("cart");
        let pass = h
            .engine
            .run_conversion_reporting(50, t0())
            .await
            .expect("pass");
        assert_eq!(pass.processed, 0);
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test]
    async fn each_event_type_is_reported_exactly_once() {
        let h = harness();
        let cart = recovered_cart(&h, "user_1", "tok_1").await;

        let first = h
            .engine
            .run_conversion_reporting(50, t0() + Duration::hours(6))
            .await
            .expect("pass");
        assert_eq!(first.processed, 2);
        assert_eq!(first.successful, 2);

        let second = h
            .engine
            .run_conversion_reporting(50, t0() + Duration::hours(7))
            .await
            .expect("pass");
        assert_eq!(second.processed, 0);
        assert_eq!(h.transport.calls(), 2);

        let stored = h.db.get_cart(&cart.id).await.expect("get").expect("cart");
        assert!(stored.capi_purchase_sent && stored.capi_add_to_cart_sent);
        let reported = h.transport.reported.lock().expect("lock");
        let purchase = reported
            .iter()
            .find(|(_, e)| e.event_type == ConversionEventType::Purchase)
            .expect("purchase event");
        assert_eq!(purchase.0, "px_user_1");
        assert_eq!(purchase.1.value, 120.0);
        assert_eq!(
            stored.conversion_event_id(ConversionEventType::Purchase),
            Some(format!("fb_{}", purchase.1.event_id).as_str())
        );
    }

    #[tokio::test]
    async fn transport_failure_records_error_and_retries() {
        let h = harness();
        let cart = recovered_cart(&h, "user_1", "tok_1").await;
        h.transport.fail_next.store(2, Ordering::SeqCst);

        let failed = h
            .engine
            .run_conversion_reporting(50, t0() + Duration::hours(6))
            .await
            .expect("pass");
        assert_eq!(failed.failed, 2);
        let stored = h.db.get_cart(&cart.id).await.expect("get").expect("cart");
        assert_eq!(stored.capi_error.as_deref(), Some("graph api responded 500"));
        assert!(!stored.capi_purchase_sent);

        let retry = h
            .engine
            .run_conversion_reporting(50, t0() + Duration::hours(7))
            .await
            .expect("retry");
        assert_eq!(retry.successful, 2);
        let stored = h.db.get_cart(&cart.id).await.expect("get").expect("cart");
        assert!(stored.capi_purchase_sent);
        assert_eq!(stored.capi_error, None);
    }

    #[tokio::test]
    async fn missing_credentials_isolate_one_user() {
        let h = harness_with(StaticCredentials {
            denied: vec!["user_2".to_string()],
        });
        let ok = recovered_cart(&h, "user_1", "tok_1").await;
        let blocked = recovered_cart(&h, "user_2", "tok_2").await;

        let pass = h
            .engine
            .run_conversion_reporting(50, t0() + Duration::hours(6))
            .await
            .expect("pass");
        assert_eq!(pass.processed, 2);
        assert_eq!(pass.successful, 2);
        assert_eq!(pass.skipped, 0);
        assert_eq!(pass.users_skipped, 1);

        assert!(h.db.get_cart(&ok.id).await.expect("get").expect("cart").capi_purchase_sent);
        let blocked = h.db.get_cart(&blocked.id).await.expect("get").expect("cart");
        assert!(!blocked.capi_purchase_sent);
        assert_eq!(blocked.capi_error, None);
    }

    #[tokio::test]
    async fn limit_bounds_the_batch() {
        let h = harness();
        for i in 0..4 {
            recovered_cart(&h, "user_1", &format!("tok_{i}")).await;
        }
        let pass = h
            .engine
            .run_conversion_reporting(3, t0() + Duration::hours(6))
            .await
            .expect("pass");
        assert_eq!(pass.processed, 3);
        assert_eq!(h.transport.calls(), 3);
    }

    #[tokio::test]
    async fn users_without_credentials_never_take_batch_slots() {
        let h = harness_with(StaticCredentials {
            denied: vec!["user_2".to_string()],
        });
        for i in 0..3 {
            recovered_cart_at(&h, "user_2", &format!("tok_blocked_{i}"), t0() + Duration::hours(1))
                .await;
        }
        let ok = recovered_cart_at(&h, "user_1", "tok_1", t0() + Duration::hours(5)).await;

        let pass = h
            .engine
            .run_conversion_reporting(3, t0() + Duration::hours(6))
            .await
            .expect("pass");
        assert_eq!(pass.processed, 2);
        assert_eq!(pass.successful, 2);
        assert_eq!(pass.users_skipped, 1);

        let stored = h.db.get_cart(&ok.id).await.expect("get").expect("cart");
        assert!(stored.capi_purchase_sent && stored.capi_add_to_cart_sent);
        let reported = h.transport.reported.lock().expect("lock");
        assert!(reported.iter().all(|(pixel, _)| pixel == "px_user_1"));
    }

    #[tokio::test]
    async fn busy_user_does_not_crowd_out_others() {
        let h = harness();
        for i in 0..3 {
            recovered_cart_at(&h, "user_2", &format!("tok_busy_{i}"), t0() + Duration::hours(1))
                .await;
        }
        let quiet = recovered_cart_at(&h, "user_1", "tok_1", t0() + Duration::hours(5)).await;

        let pass = h
            .engine
            .run_conversion_reporting(4, t0() + Duration::hours(6))
            .await
            .expect("pass");
        assert_eq!(pass.successful, 4);
        let stored = h.db.get_cart(&quiet.id).await.expect("get").expect("cart");
        assert!(stored.capi_purchase_sent && stored.capi_add_to_cart_sent);
    }

    #[tokio::test]
    async fn limit_is_shared_between_event_types() {
        let h = harness();
        for i in 0..3 {
            recovered_cart(&h, "user_1", &format!("tok_{i}")).await;
        }
        let pass = h
            .engine
            .run_conversion_reporting(2, t0() + Duration::hours(6))
            .await
            .expect("pass");
        assert_eq!(pass.successful, 2);
        let reported = h.transport.reported.lock().expect("lock");
        let purchases = reported
            .iter()
            .filter(|(_, e)| e.event_type == ConversionEventType::Purchase)
            .count();
        assert_eq!(purchases, 1);
    }

    #[test]
    fn unused_budget_flows_to_the_other_type() {
        assert_eq!(split_budget(3, 4, 4), (1, 2));
        assert_eq!(split_budget(3, 0, 4), (0, 3));
        assert_eq!(split_budget(3, 4, 1), (2, 1));
        assert_eq!(split_budget(4, 1, 1), (1, 1));
        assert_eq!(split_budget(1, 5, 0), (1, 0));
    }

    #[tokio::test]
    async fn overlapping_passes_report_once() {
        let h = harness();
        recovered_cart(&h, "user_1", "tok_1").await;
        let now = t0() + Duration::hours(6);
        let (a, b) = tokio::join!(
            h.engine.run_conversion_reporting(50, now),
            h.engine.run_conversion_reporting(50, now)
        );
        assert_eq!(a.expect("a").successful + b.expect("b").successful, 2);
        assert_eq!(h.transport.calls(), 2);
    }
}
