//! Cart repository abstraction.
//!
//! Every mutating method that guards a state transition is a conditional
//! update: it returns `false` (or `None`) when the row no longer matches the
//! expected prior value, so overlapping passes cannot both apply the same
//! transition.

use chrono::{DateTime, Utc};

use crate::{
    cart::{
        AbandonedCart, ActionOutcome, ConversionEventType, EngagementKind, NewAbandonedCart,
        NewRecoveryAction, RecoveryAction,
    },
    event::CheckoutEvent,
    settings::{RecoverySettings, UserRecoverySettings},
};

#[async_trait::async_trait]
pub trait CartRepository: Send + Sync + 'static {
    async fn ping(&self) -> anyhow::Result<()>;

    // -- checkout events ----------------------------------------------------

    async fn insert_checkout_event(&self, event: &CheckoutEvent) -> anyhow::Result<()>;

    async fn get_checkout_event(&self, event_id: &str) -> anyhow::Result<Option<CheckoutEvent>>;

    /// Unprocessed `checkout_created`/`checkout_updated` events created at or
    /// before `created_before`, oldest first.
    async fn list_unprocessed_checkout_events(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<CheckoutEvent>>;

    /// Unprocessed `order_created` events regardless of age, oldest first.
    async fn list_unprocessed_order_events(&self, limit: i64)
        -> anyhow::Result<Vec<CheckoutEvent>>;

    /// Flip `processed` to true. Returns `false` if it already was.
    async fn mark_event_processed(&self, event_id: &str) -> anyhow::Result<bool>;

    /// Mark every unprocessed checkout event of one upstream cart processed.
    /// Used when an order completes the checkout before it was ever promoted.
    async fn mark_cart_events_processed(
        &self,
        user_id: &str,
        platform_cart_id: &str,
    ) -> anyhow::Result<usize>;

    // -- carts --------------------------------------------------------------

    /// Insert a new `abandoned` cart or refresh the contents of the existing
    /// row with the same `platform_cart_id`. Status, counters and reporting
    /// flags of an existing row are never touched.
    async fn upsert_abandoned_cart(&self, cart: NewAbandonedCart) -> anyhow::Result<AbandonedCart>;

    async fn get_cart(&self, cart_id: &str) -> anyhow::Result<Option<AbandonedCart>>;

    /// Open cart for an order: the `abandoned` cart with this
    /// `platform_cart_id`, else the newest `abandoned` cart of the user with
    /// the same email. A token that already matches a `recovered` cart yields
    /// `None`.
    async fn find_open_cart_for_order(
        &self,
        user_id: &str,
        platform_cart_id: &str,
        customer_email: Option<&str>,
    ) -> anyhow::Result<Option<AbandonedCart>>;

    /// Scheduling candidates for one user: `abandoned`, abandoned at or before
    /// `abandoned_before`, last email at or before `last_email_before` (or
    /// none yet), fewer than `max_emails` sent, email present.
    async fn list_due_carts(
        &self,
        user_id: &str,
        abandoned_before: DateTime<Utc>,
        last_email_before: DateTime<Utc>,
        max_emails: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<AbandonedCart>>;

    /// Advance the send counter from `expected_sent` to `expected_sent + 1`.
    async fn record_email_sent(
        &self,
        cart_id: &str,
        expected_sent: u32,
        sent_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// `abandoned -> recovered`.
    async fn mark_cart_recovered(
        &self,
        cart_id: &str,
        recovered_value: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// `abandoned -> expired`.
    async fn mark_cart_expired(&self, cart_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;

    // -- recovery actions ---------------------------------------------------

    async fn has_action_for_event(&self, checkout_event_id: &str) -> anyhow::Result<bool>;

    /// Atomically create a `pending` action for `(cart, email_number)`.
    ///
    /// Returns `None` when the cart is no longer `abandoned`, its counter has
    /// moved past `email_number - 1`, or a `pending`/`sent` action for the same
    /// email number already exists.
    async fn claim_recovery_send(
        &self,
        action: NewRecoveryAction,
    ) -> anyhow::Result<Option<RecoveryAction>>;

    /// Move a `pending` action to `sent` or `failed`.
    async fn complete_recovery_action(
        &self,
        action_id: &str,
        outcome: ActionOutcome,
    ) -> anyhow::Result<bool>;

    async fn get_action(&self, action_id: &str) -> anyhow::Result<Option<RecoveryAction>>;

    async fn list_actions_for_cart(&self, cart_id: &str) -> anyhow::Result<Vec<RecoveryAction>>;

    /// Set the engagement flag once; later calls keep the first timestamp.
    async fn record_engagement(
        &self,
        action_id: &str,
        kind: EngagementKind,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Mark the most recent `sent` action of the cart as converted.
    async fn mark_latest_action_converted(
        &self,
        cart_id: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    // -- conversion reporting ----------------------------------------------

    /// Users with at least one unreported, unclaimed conversion, longest
    /// waiting first.
    async fn list_pending_conversion_users(&self) -> anyhow::Result<Vec<String>>;

    /// `recovered` carts of one user whose flag for `event_type` is unset and
    /// unclaimed.
    async fn list_pending_conversions(
        &self,
        user_id: &str,
        event_type: ConversionEventType,
        limit: i64,
    ) -> anyhow::Result<Vec<AbandonedCart>>;

    /// Take the in-flight claim for one `(cart, event_type)` report.
    async fn claim_conversion_report(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
    ) -> anyhow::Result<bool>;

    /// Set the sent-flag, store the external id, clear error and claim.
    async fn complete_conversion_report(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
        external_event_id: &str,
    ) -> anyhow::Result<bool>;

    /// Drop the claim and record the failure so the next pass retries.
    async fn release_conversion_claim(
        &self,
        cart_id: &str,
        event_type: ConversionEventType,
        claim: &str,
        error: &str,
    ) -> anyhow::Result<()>;

    // -- settings -----------------------------------------------------------

    async fn get_recovery_settings(&self, user_id: &str)
        -> anyhow::Result<Option<RecoverySettings>>;

    async fn upsert_recovery_settings(
        &self,
        user_id: &str,
        settings: &RecoverySettings,
    ) -> anyhow::Result<()>;

    async fn list_enabled_recovery_settings(&self) -> anyhow::Result<Vec<UserRecoverySettings>>;
}
