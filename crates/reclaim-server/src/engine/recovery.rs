use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use reclaim_core::{
    cart::{AbandonedCart, ActionOutcome, NewRecoveryAction},
    schedule::{evaluate_send, SendDecision},
    settings::{RecoverySettings, UserRecoverySettings},
    template::render_recovery_email,
    transport::OutgoingEmail,
};

use super::{Engine, SchedulingSummary};

enum CartOutcome {
    Sent,
    Skipped,
    Failed,
}

impl Engine {
    /// Send every recovery email that is due at `now`.
    ///
    /// Users are isolated from each other: a repository failure for one
    /// user is counted and logged, and the pass moves on.
    pub async fn run_scheduling(&self, now: DateTime<Utc>) -> anyhow::Result<SchedulingSummary> {
        let mut summary = SchedulingSummary::default();
        for user in self.repo.list_enabled_recovery_settings().await? {
            if let Err(e) = self.schedule_user(&user, now, &mut summary).await {
                error!(user_id = %user.user_id, error = %e, "scheduling failed for user");
                summary.errors += 1;
            }
        }
        info!(
            sent = summary.sent,
            skipped = summary.skipped,
            errors = summary.errors,
            "scheduling pass finished"
        );
        Ok(summary)
    }

    async fn schedule_user(
        &self,
        user: &UserRecoverySettings,
        now: DateTime<Utc>,
        summary: &mut SchedulingSummary,
    ) -> anyhow::Result<()> {
        let settings = &user.settings;
        if let Err(e) = settings.validate() {
            warn!(user_id = %user.user_id, error = %e, "recovery settings unusable, user skipped");
            return Ok(());
        }

        let carts = self
            .repo
            .list_due_carts(
                &user.user_id,
                now - settings.delay(),
                now - settings.interval(),
                settings.max_emails,
                self.settings.scheduling_batch_size,
            )
            .await?;

        for cart in carts {
            match self.process_cart(&cart, settings, now).await {
                Ok(CartOutcome::Sent) => summary.sent += 1,
                Ok(CartOutcome::Skipped) => summary.skipped += 1,
                Ok(CartOutcome::Failed) => summary.errors += 1,
                Err(e) => {
                    warn!(cart_id = %cart.id, user_id = %cart.user_id, error = %e, "recovery send failed");
                    summary.errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn process_cart(
        &self,
        cart: &AbandonedCart,
        settings: &RecoverySettings,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CartOutcome> {
        let email_number = match evaluate_send(cart, settings, now) {
            SendDecision::Due { email_number } => email_number,
            SendDecision::MissingCheckoutUrl => {
                warn!(cart_id = %cart.id, "cart has no checkout url, never sending");
                return Ok(CartOutcome::Skipped);
            }
            decision => {
                debug!(cart_id = %cart.id, ?decision, "cart not due");
                return Ok(CartOutcome::Skipped);
            }
        };
        let (Some(recipient), Some(from_email)) = (
            cart.customer_email.as_deref(),
            settings.sender_email.as_deref(),
        ) else {
            return Ok(CartOutcome::Skipped);
        };

        let rendered = render_recovery_email(settings, cart, email_number);
        let claim = self
            .repo
            .claim_recovery_send(NewRecoveryAction {
                cart_id: cart.id.clone(),
                checkout_event_id: cart.source_event_id.clone(),
                user_id: cart.user_id.clone(),
                email_number,
                recipient: recipient.to_string(),
                subject: Some(rendered.subject.clone()),
                created_at: now,
            })
            .await?;
        let Some(action) = claim else {
            info!(cart_id = %cart.id, email_number, "send already claimed by another pass");
            return Ok(CartOutcome::Skipped);
        };

        let email = OutgoingEmail {
            to: recipient.to_string(),
            from_email: from_email.to_string(),
            from_name: settings.sender_name.clone(),
            reply_to: settings.reply_to.clone(),
            subject: rendered.subject,
            html_body: rendered.html_body,
            text_body: rendered.text_body,
        };
        let timeout = self.settings.external_timeout;
        let result = match tokio::time::timeout(timeout, self.mailer.send(&email)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("mailer timed out after {}s", timeout.as_secs())),
        };

        match result {
            Ok(receipt) => {
                self.repo
                    .complete_recovery_action(
                        &action.id,
                        ActionOutcome::Sent {
                            external_message_id: receipt.external_message_id,
                            sent_at: now,
                        },
                    )
                    .await?;
                if !self
                    .repo
                    .record_email_sent(&cart.id, cart.recovery_emails_sent, now)
                    .await?
                {
                    warn!(cart_id = %cart.id, email_number, "send counter moved during send");
                }
                info!(
                    cart_id = %cart.id,
                    user_id = %cart.user_id,
                    action_id = %action.id,
                    email_number,
                    "recovery email sent"
                );
                Ok(CartOutcome::Sent)
            }
            Err(error) => {
                warn!(
                    cart_id = %cart.id,
                    action_id = %action.id,
                    email_number,
                    error = %error,
                    "recovery email failed"
                );
                self.repo
                    .complete_recovery_action(&action.id, ActionOutcome::Failed { error })
                    .await?;
                Ok(CartOutcome::Failed)
            }
        }
    }
}
