use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reclaim_core::{
    cart::{
        AbandonedCart, ActionOutcome, ConversionEventType, EngagementKind, NewAbandonedCart,
        NewRecoveryAction, RecoveryAction,
    },
    event::CheckoutEvent,
    repository::CartRepository,
    settings::{RecoverySettings, UserRecoverySettings},
};

use crate::DuckDbBackend;

#[async_trait]
impl CartRepository for DuckDbBackend {
    async fn ping(&self) -> anyhow::Result<()> {
        DuckDbBackend::ping(self).await
    }

    async fn insert_checkout_event(&self, event: &CheckoutEvent) -> anyhow::Result<()> {
        DuckDbBackend::insert_checkout_event(self, event).await
    }

    async fn get_checkout_event(&self, event_id: &str) -> anyhow::Result<Option<CheckoutEvent>> {
        DuckDbBackend::get_checkout_event(self, event_id).await
    }

    async fn list_unprocessed_checkout_events(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<CheckoutEvent>> {
        DuckDbBackend::list_unprocessed_checkout_events(self, created_before, limit).await
    }

    async fn list_unprocessed_order_events(
        &self,
        limit: i64,
    ) -> anyhow::Result<Vec<CheckoutEvent>> {
        DuckDbBackend::list_unprocessed_order_events(self, limit).await
    }

    async fn mark_event_processed(&self, event_id: &str) -> anyhow::Result<bool> {
        DuckDbBackend::mark_event_processed(self, event_id).await
    }

    async fn mark_cart_events_processed(
        &self,
        user_id: &str,
        platform_cart_id: &str,
    ) -> anyhow::Result<usize> {
        DuckDbBackend::mark_cart_events_processed(self, user_id, platform_cart_id).await
    }

    async fn upsert_abandoned_cart(&self, cart: NewAbandonedCart) -> anyhow::Result<AbandonedCart> {
        DuckDbBackend::upsert_abandoned_cart(self, cart).await
    }

    async fn get_cart(&self, cart_id: &str) -> anyhow::Result<Option<AbandonedCart>> {
        DuckDbBackend::get_cart(self, cart_id).await
    }

    async fn find_open_cart_for_order(
        &self,
        user_id: &str,
        platform_cart_id: &str,
        customer_email: Option<&str>,
    ) -> anyhow::Result<Option<AbandonedCart>> {
        DuckDbBackend::find_open_cart_for_order(self, user_id, platform_cart_id, customer_email)
            .await
    }

    async fn list_due_carts(
        &self,
        user_id: &str,
        abandoned_before: DateTime<Utc>,
        last_email_before: DateTime<Utc>,
        max_emails: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<AbandonedCart>> {
        DuckDbBackend::list_due_carts(
            self,
            user_id,
            abandoned_before,
            last_email_before,
            max_emails,
            limit,
        )
        .await
    }

    async fn record_email_sent(
        &self,
        cart_id: &str,
        expected_sent: u32,
        sent_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        DuckDbBackend::record_email_sent(self, cart_id, expected_sent, sent_at).await
    }

    async fn mark_cart_recovered(
        &self,
        cart_id: &str,
        recovered_value: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        DuckDbBackend::mark_cart_recovered(self, cart_id, recovered_value, now).await
    }

    async fn mark_cart_expired(&self, cart_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        DuckDbBackend::mark_cart_expired(self, cart_id, now).await
    }

    async fn has_action_for_event(&self, checkout_event_id: &str) -> anyhow::Result<bool> {
        DuckDbBackend::has_action_for_event(self, checkout_event_id).await
    }

    async fn claim_recovery_send(
        &self,
        action: NewRecoveryAction,
    ) -> anyhow::Result<Option<RecoveryAction>> {
        DuckDbBackend::claim_recovery_send(self, action).await
    }

    async fn complete_recovery_action(
        &self,
        action_id: &str,
        outcome: ActionOutcome,
    ) -> anyhow::Result<bool> {
        DuckDbBackend::complete_recovery_action(self, action_id, outcome).await
    }

    async fn get_action(&self, action_id: &str) -> anyhow::Result<Option<RecoveryAction>> {
        DuckDbBackend::get_action(self, action_id).await
    }

    async fn list_actions_for_cart(&self, cart_id: &str) -> anyhow::Result<Vec<RecoveryAction>> {
        DuckDbBackend::list_actions_for_cart(self, cart_id).await
    }

    async fn record_engagement(
        &self,
        action_id: &str,
        kind: EngagementKind,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        DuckDbBackend::record_engagement(self, action_id, kind, now).await
    }

    async fn mark_latest_action_converted(
        &self,
        cart_id: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        DuckDbBackend::mark_latest_action_converted(self, cart_id, value, now).await
    }

    async fn list_pending_conversion_users(&self) -> anyhow::Result<Vec<String>> {
        DuckDbBackend::list_pending_conversion_users(self).await
    }

    async fn list_pending_conversions(
        &self,
        user_id: &str,
        event_type: ConversionEventType,
        limit: i64,
    ) -> anyhow::Result<Vec<AbandonedCart>> {
        DuckDbBackend::list_pending_conversions(self, user_id, event_type, limit).await
    }

    async fn claim_conversion_report(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
    ) -> anyhow::Result<bool> {
        DuckDbBackend::claim_conversion_report(self, cart_id, event_type, claim).await
    }

    async fn complete_conversion_report(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
        external_event_id: &str,
    ) -> anyhow::Result<bool> {
        DuckDbBackend::complete_conversion_report(self, cart_id, event_type, claim, external_event_id)
            .await
    }

    async fn release_conversion_claim(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
        error: &str,
    ) -> anyhow::Result<()> {
        DuckDbBackend::release_conversion_claim(self, cart_id, event_type, claim, error).await
    }

    async fn get_recovery_settings(
        &self,
        user_id: &str,
    ) -> anyhow::Result<Option<RecoverySettings>> {
        DuckDbBackend::get_recovery_settings(self, user_id).await
    }

    async fn upsert_recovery_settings(
        &self,
        user_id: &str,
        settings: &RecoverySettings,
    ) -> anyhow::Result<()> {
        DuckDbBackend::upsert_recovery_settings(self, user_id, settings).await
    }

    async fn list_enabled_recovery_settings(&self) -> anyhow::Result<Vec<UserRecoverySettings>> {
        DuckDbBackend::list_enabled_recovery_settings(self).await
    }
}
